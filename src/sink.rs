//! 事件输出与会话持久化
//! Reporting/persistence collaborators

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::SinkError;
use crate::events::SentinelEvent;
use crate::identity::IdentitySession;

/// 事件上报 (日志/数据库/消息队列等)
pub trait EventSink: Send + Sync {
    fn publish(&self, stream_id: &str, event: &SentinelEvent) -> Result<(), SinkError>;
}

/// 身份会话持久化 (会话过期时调用)
pub trait SessionStore: Send + Sync {
    fn flush(&self, session: &IdentitySession) -> Result<(), SinkError>;
}

#[derive(Serialize)]
struct EventRecord<'a> {
    stream_id: &'a str,
    #[serde(flatten)]
    event: &'a SentinelEvent,
}

#[derive(Serialize)]
struct SessionRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    session: &'a IdentitySession,
}

// ========== 内存实现 ==========

/// 内存缓存 (测试与嵌入调用方使用)
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<(String, SentinelEvent)>>,
    sessions: Mutex<Vec<IdentitySession>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, SentinelEvent)> {
        self.events.lock().clone()
    }

    pub fn sessions(&self) -> Vec<IdentitySession> {
        self.sessions.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, stream_id: &str, event: &SentinelEvent) -> Result<(), SinkError> {
        self.events.lock().push((stream_id.to_string(), event.clone()));
        Ok(())
    }
}

impl SessionStore for MemorySink {
    fn flush(&self, session: &IdentitySession) -> Result<(), SinkError> {
        self.sessions.lock().push(session.clone());
        Ok(())
    }
}

// ========== JSON Lines 实现 ==========

/// 每行一个JSON对象
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn write_line<T: Serialize>(&self, record: &T) -> Result<(), SinkError> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush_writer(&self) -> Result<(), SinkError> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

impl EventSink for JsonLinesSink {
    fn publish(&self, stream_id: &str, event: &SentinelEvent) -> Result<(), SinkError> {
        self.write_line(&EventRecord { stream_id, event })
    }
}

impl SessionStore for JsonLinesSink {
    fn flush(&self, session: &IdentitySession) -> Result<(), SinkError> {
        self.write_line(&SessionRecord {
            kind: "identity_session",
            session,
        })
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;
    use crate::events::CrossingEvent;
    use chrono::{TimeZone, Utc};

    fn session() -> IdentitySession {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        IdentitySession {
            track_id: 7,
            stream_id: "door".to_string(),
            label: "alice".to_string(),
            is_known: true,
            confidence: 0.9,
            bbox: BBox::new(10.0, 20.0, 50.0, 80.0),
            first_seen: t,
            last_seen: t,
            external_ref: None,
            label_changes: 0,
        }
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        let event = SentinelEvent::from(CrossingEvent {
            track_id: 1,
            timestamp: 0.5,
        });
        sink.publish("cam-1", &event).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0], ("cam-1".to_string(), event));
    }

    #[test]
    fn test_json_lines_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let sink = JsonLinesSink::create(&path).unwrap();
            for id in 1..=2 {
                let event = SentinelEvent::from(CrossingEvent {
                    track_id: id,
                    timestamp: id as f64,
                });
                sink.publish("line-a", &event).unwrap();
            }
            sink.flush(&session()).unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["stream_id"], "line-a");
        assert_eq!(lines[0]["type"], "crossing");
        assert_eq!(lines[1]["track_id"], 2);

        assert_eq!(lines[2]["type"], "identity_session");
        assert_eq!(lines[2]["track_id"], 7);
        assert_eq!(lines[2]["stream_id"], "door");
        assert_eq!(lines[2]["label"], "alice");
        assert_eq!(lines[2]["bbox"], serde_json::json!([10.0, 20.0, 50.0, 80.0]));
    }
}
