//! 跨流共享的身份登记表
//! Shared identity registry: one mutex guards the session cache and the
//! duplicate suppressor so every read-modify-write is atomic
//!
//! 锁内只做内存操作; 上报与持久化在释放锁之后进行.
//! 持久化失败的会话留在待写列表, 下次清理时重试

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use super::dedup::{DedupOutcome, DuplicateSuppressor};
use super::session::{IdentitySession, IdentitySessionCache};
use crate::detection::types::{BBox, TrackId};
use crate::events::{IdentityEvent, SentinelEvent};
use crate::sink::{EventSink, SessionStore};

/// 身份统计快照
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IdentityStatistics {
    pub active_sessions: usize,
    pub known_sessions: usize,
    pub unknown_sessions: usize,
    pub accepted_events: u64,
    pub suppressed_duplicates: u64,
    pub flushed_sessions: u64,
    /// 已过期但尚未成功持久化
    pub pending_flush: usize,
}

struct RegistryState {
    cache: IdentitySessionCache,
    dedup: DuplicateSuppressor,
    pending_flush: Vec<IdentitySession>,
    accepted_events: u64,
    suppressed_duplicates: u64,
    flushed_sessions: u64,
}

pub struct IdentityRegistry {
    state: Mutex<RegistryState>,
    events: Arc<dyn EventSink>,
    store: Arc<dyn SessionStore>,
}

impl IdentityRegistry {
    pub fn new(
        cache: IdentitySessionCache,
        dedup: DuplicateSuppressor,
        events: Arc<dyn EventSink>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                cache,
                dedup,
                pending_flush: Vec::new(),
                accepted_events: 0,
                suppressed_duplicates: 0,
                flushed_sessions: 0,
            }),
            events,
            store,
        }
    }

    /// 登记一次识别结果
    ///
    /// 窗口内重复的事件返回 `duplicate = true` 且不上报
    pub fn record(
        &self,
        stream_id: &str,
        label: &str,
        is_known: bool,
        confidence: f32,
        bbox: BBox,
        now: DateTime<Utc>,
    ) -> IdentityEvent {
        let (track_id, outcome) = {
            let mut state = self.state.lock();
            let track_id = state
                .cache
                .update_session(stream_id, label, is_known, confidence, bbox, now);
            let key = dedup_key(label, is_known, track_id);
            let outcome = state.dedup.check_and_record(&key, now);
            match outcome {
                DedupOutcome::Accepted => state.accepted_events += 1,
                DedupOutcome::Duplicate { .. } => state.suppressed_duplicates += 1,
            }
            (track_id, outcome)
        };

        let event = IdentityEvent {
            track_id,
            label: label.to_string(),
            is_known,
            confidence,
            duplicate: outcome.is_duplicate(),
            timestamp: now,
        };

        if !event.duplicate {
            info!(stream_id, track_id, label, is_known, "identity event accepted");
            let published = SentinelEvent::Identity(event.clone());
            if let Err(e) = self.events.publish(stream_id, &published) {
                warn!(stream_id, track_id, error = %e, "failed to publish identity event");
            }
        }

        event
    }

    /// 清理超时会话并持久化, 返回清理数量
    pub fn expire_old_sessions(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let (expired, batch) = {
            let mut state = self.state.lock();
            let expired = state.cache.expire_old_sessions(now, timeout);
            (expired.len(), Self::take_batch(&mut state, expired))
        };
        self.flush_batch(batch);

        self.state.lock().dedup.purge(now);
        expired
    }

    /// 所有会话 (含待重试) 立即持久化, 返回移出缓存的数量
    pub fn flush_all(&self) -> usize {
        let (drained, batch) = {
            let mut state = self.state.lock();
            let drained = state.cache.drain();
            (drained.len(), Self::take_batch(&mut state, drained))
        };
        self.flush_batch(batch);
        drained
    }

    /// 待重试的会话排在新过期会话之前
    fn take_batch(
        state: &mut RegistryState,
        expired: Vec<IdentitySession>,
    ) -> Vec<IdentitySession> {
        let mut batch = std::mem::take(&mut state.pending_flush);
        batch.extend(expired);
        batch
    }

    /// 在锁外写入; 失败的会话放回待写列表
    fn flush_batch(&self, batch: Vec<IdentitySession>) {
        if batch.is_empty() {
            return;
        }
        let total = batch.len();
        let mut failed = Vec::new();
        for session in batch {
            if let Err(e) = self.store.flush(&session) {
                warn!(
                    track_id = session.track_id,
                    error = %e,
                    "failed to flush identity session, will retry"
                );
                failed.push(session);
            }
        }
        let flushed = total - failed.len();
        info!(flushed, pending = failed.len(), "identity sessions flushed");

        let mut state = self.state.lock();
        state.flushed_sessions += flushed as u64;
        state.pending_flush.extend(failed);
    }

    /// 按缓存配置的超时清理
    pub fn expire(&self, now: DateTime<Utc>) -> usize {
        let timeout = self.state.lock().cache.session_timeout();
        self.expire_old_sessions(now, timeout)
    }

    pub fn set_external_ref(&self, track_id: TrackId, external_ref: impl Into<String>) -> bool {
        self.state.lock().cache.set_external_ref(track_id, external_ref)
    }

    pub fn statistics(&self) -> IdentityStatistics {
        let state = self.state.lock();
        let known_sessions = state.cache.sessions().filter(|s| s.is_known).count();
        IdentityStatistics {
            active_sessions: state.cache.len(),
            known_sessions,
            unknown_sessions: state.cache.len() - known_sessions,
            accepted_events: state.accepted_events,
            suppressed_duplicates: state.suppressed_duplicates,
            flushed_sessions: state.flushed_sessions,
            pending_flush: state.pending_flush.len(),
        }
    }
}

/// 已知身份按标签去重; 未知人员按会话去重
fn dedup_key(label: &str, is_known: bool, track_id: TrackId) -> String {
    if is_known {
        label.to_string()
    } else {
        format!("unknown:{track_id}")
    }
}
