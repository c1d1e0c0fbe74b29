//! 单路流处理管线与工作线程池
//! Per-stream pipeline state and one-worker-per-stream pool
//!
//! 数据流: 检测 → 质心跟踪 → {聚集 → 徘徊}, {越线计数}, {区域触发} → 事件
//!
//! 每路流独占自己的状态, 帧必须按时间戳递增顺序送入 (不做校验)

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analytics::{
    Group, LineCrossingCounter, LoiteringStateMachine, ProximityGroupDetector, Recognizer, Zone,
    ZoneTriggerManager,
};
use crate::config::SentinelConfig;
use crate::detection::{sanitize_detections, BBox, CentroidTracker, Frame, Point, TrackId};
use crate::events::{CrossingEvent, GateAlert, LoiteringEvent, SentinelEvent};
use crate::sink::EventSink;

/// 单帧处理结果
#[derive(Clone, Debug, Default)]
pub struct FrameEvents {
    pub timestamp: f64,
    /// 当前存活轨迹
    pub tracks: BTreeMap<TrackId, Point>,
    pub groups: Vec<Group>,
    pub loitering_track_ids: BTreeSet<TrackId>,
    pub loitering_group_members: BTreeSet<TrackId>,
    pub loitering: Vec<LoiteringEvent>,
    pub crossings: Vec<CrossingEvent>,
    pub total_crossings: usize,
    pub gate_alerts: Vec<GateAlert>,
}

impl FrameEvents {
    pub fn is_empty(&self) -> bool {
        self.loitering.is_empty() && self.crossings.is_empty() && self.gate_alerts.is_empty()
    }

    /// 展开为统一事件 (越线 → 徘徊 → 道闸)
    pub fn into_events(self) -> Vec<SentinelEvent> {
        let mut events = Vec::with_capacity(
            self.crossings.len() + self.loitering.len() + self.gate_alerts.len(),
        );
        events.extend(self.crossings.into_iter().map(SentinelEvent::from));
        events.extend(self.loitering.into_iter().map(SentinelEvent::from));
        events.extend(self.gate_alerts.into_iter().map(SentinelEvent::from));
        events
    }
}

/// 单路流统计快照
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StreamStatistics {
    pub stream_id: String,
    pub frames_processed: u64,
    pub active_tracks: usize,
    pub tracks_registered: u64,
    pub active_groups: usize,
    pub loitering_tracks: usize,
    pub total_crossings: usize,
    pub active_zone_sessions: usize,
    pub triggers_fired: u64,
    pub category_counts: BTreeMap<String, usize>,
}

/// 单路流的全部状态 (显式构造, 不使用全局单例)
pub struct StreamPipeline {
    stream_id: String,
    config: SentinelConfig,
    tracker: CentroidTracker,
    grouping: ProximityGroupDetector,
    loitering: Option<LoiteringStateMachine>,
    line_counter: Option<LineCrossingCounter>,
    /// 区域在收到第一帧 (已知画面尺寸) 时确定
    zone: Option<ZoneTriggerManager>,
    recognizer: Option<Arc<dyn Recognizer>>,
    gate_unwired_warned: bool,
    last_groups: usize,
    frames_processed: u64,
    last_timestamp: f64,
}

impl StreamPipeline {
    pub fn new(stream_id: impl Into<String>, config: SentinelConfig) -> Self {
        let loitering = config
            .features
            .loitering
            .then(|| LoiteringStateMachine::new(config.loitering_config()));
        let line_counter = config.features.line_crossing.then(|| {
            LineCrossingCounter::new(
                config.line_crossing.line_position_ratio,
                config.line_crossing.direction,
            )
        });

        Self {
            stream_id: stream_id.into(),
            tracker: CentroidTracker::new(config.tracker_config()),
            grouping: ProximityGroupDetector::new(
                config.grouping.group_distance,
                config.grouping.policy,
            ),
            loitering,
            line_counter,
            zone: None,
            recognizer: None,
            gate_unwired_warned: false,
            last_groups: 0,
            frames_processed: 0,
            last_timestamp: 0.0,
            config,
        }
    }

    /// 启用区域触发所需的识别器
    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// 处理一帧
    pub fn process_frame(&mut self, frame: &Frame) -> FrameEvents {
        let now = frame.timestamp;
        let detections = sanitize_detections(&frame.detections);
        let centroids: Vec<Point> = detections.iter().map(|d| d.bbox.center()).collect();

        let tracks = self.tracker.update(&centroids, now);

        let mut track_of = vec![None; detections.len()];
        for &(det_idx, id) in self.tracker.assignments() {
            track_of[det_idx] = Some(id);
        }
        let boxes: Vec<(BBox, Option<TrackId>)> = detections
            .iter()
            .zip(&track_of)
            .map(|(d, id)| (d.bbox, *id))
            .collect();

        let groups = self.grouping.detect_groups(&tracks);
        self.last_groups = groups.len();

        let mut out = FrameEvents {
            timestamp: now,
            ..FrameEvents::default()
        };

        if let Some(loitering) = self.loitering.as_mut() {
            let report = loitering.update(&tracks, &groups, now);
            out.loitering_track_ids = report.loitering_track_ids;
            out.loitering_group_members = report.loitering_group_members;
            out.loitering = report.events;
        }

        if let Some(counter) = self.line_counter.as_mut() {
            let report = counter.detect(&boxes, frame.width, self.config.line_crossing.line_x, now);
            counter.retain_tracks(|id| tracks.contains_key(&id));
            out.crossings = report.new_crossings;
            out.total_crossings = report.total_crossings;
        }

        if self.config.features.gate {
            if let Some(recognizer) = self.recognizer.clone() {
                let zone = self.zone.get_or_insert_with(|| {
                    let zone = Zone::bottom_fraction(
                        frame.width,
                        frame.height,
                        self.config.gate.zone_bottom_fraction,
                    );
                    debug!(stream_id = %self.stream_id, ?zone, "gate zone defined");
                    ZoneTriggerManager::new(zone, self.config.zone_config())
                });
                for (det, id) in detections.iter().zip(&track_of) {
                    let Some(id) = *id else {
                        continue;
                    };
                    if let Some(alert) = zone.update(id, det, now, recognizer.as_ref()) {
                        out.gate_alerts.push(alert);
                    }
                }
                zone.expire(now);
            } else if !self.gate_unwired_warned {
                warn!(
                    stream_id = %self.stream_id,
                    "gate enabled but no recognizer attached, skipping"
                );
                self.gate_unwired_warned = true;
            }
        }

        self.frames_processed += 1;
        self.last_timestamp = now;
        out.tracks = tracks;
        out.groups = groups;
        out
    }

    /// 清零越线计数 (如每日零点)
    pub fn reset_counters(&mut self) {
        if let Some(counter) = self.line_counter.as_mut() {
            counter.reset();
        }
        info!(stream_id = %self.stream_id, "counters reset");
    }

    /// 清理超时区域会话
    pub fn expire_old_sessions(&mut self, now: f64, timeout_seconds: f64) -> usize {
        self.zone
            .as_mut()
            .map(|z| z.expire_old_sessions(now, timeout_seconds))
            .unwrap_or(0)
    }

    pub fn tracker(&self) -> &CentroidTracker {
        &self.tracker
    }

    pub fn zone_manager(&self) -> Option<&ZoneTriggerManager> {
        self.zone.as_ref()
    }

    pub fn last_timestamp(&self) -> f64 {
        self.last_timestamp
    }

    pub fn statistics(&self) -> StreamStatistics {
        StreamStatistics {
            stream_id: self.stream_id.clone(),
            frames_processed: self.frames_processed,
            active_tracks: self.tracker.track_count(),
            tracks_registered: self.tracker.registered_count(),
            active_groups: self.last_groups,
            loitering_tracks: self
                .loitering
                .as_ref()
                .map(|l| l.loitering_count())
                .unwrap_or(0),
            total_crossings: self
                .line_counter
                .as_ref()
                .map(|c| c.total_crossings())
                .unwrap_or(0),
            active_zone_sessions: self.zone.as_ref().map(|z| z.active_sessions()).unwrap_or(0),
            triggers_fired: self.zone.as_ref().map(|z| z.triggers_fired()).unwrap_or(0),
            category_counts: self
                .zone
                .as_ref()
                .map(|z| {
                    z.category_counts()
                        .iter()
                        .map(|(k, v)| (k.clone(), *v))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

// ========== 工作线程池 ==========

struct StreamWorker {
    tx: Sender<Frame>,
    handle: JoinHandle<StreamStatistics>,
}

/// 每路流一个工作线程, 有界队列送帧
pub struct StreamWorkers {
    sink: Arc<dyn EventSink>,
    queue_capacity: usize,
    workers: HashMap<String, StreamWorker>,
    dropped_frames: Arc<AtomicU64>,
}

impl StreamWorkers {
    pub fn new(sink: Arc<dyn EventSink>, queue_capacity: usize) -> Self {
        Self {
            sink,
            queue_capacity: queue_capacity.max(1),
            workers: HashMap::new(),
            dropped_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 为一路流启动工作线程
    pub fn spawn(&mut self, mut pipeline: StreamPipeline) -> Result<()> {
        let stream_id = pipeline.stream_id().to_string();
        if self.workers.contains_key(&stream_id) {
            bail!("stream {stream_id} already has a worker");
        }

        let (tx, rx) = crossbeam_channel::bounded::<Frame>(self.queue_capacity);
        let sink = self.sink.clone();
        let thread_stream_id = stream_id.clone();

        let handle = thread::Builder::new()
            .name(format!("stream-{stream_id}"))
            .spawn(move || {
                info!(stream_id = %thread_stream_id, "stream worker started");
                while let Ok(frame) = rx.recv() {
                    let events = pipeline.process_frame(&frame);
                    for event in events.into_events() {
                        if let Err(e) = sink.publish(&thread_stream_id, &event) {
                            warn!(
                                stream_id = %thread_stream_id,
                                error = %e,
                                "failed to publish event"
                            );
                        }
                    }
                }
                let stats = pipeline.statistics();
                info!(
                    stream_id = %thread_stream_id,
                    frames = stats.frames_processed,
                    crossings = stats.total_crossings,
                    "stream worker stopped"
                );
                stats
            })
            .with_context(|| format!("failed to spawn worker for stream {stream_id}"))?;

        self.workers.insert(stream_id, StreamWorker { tx, handle });
        Ok(())
    }

    /// 非阻塞送帧; 队列满或流不存在时丢弃并返回 false
    pub fn submit(&self, frame: Frame) -> bool {
        let Some(worker) = self.workers.get(&frame.stream_id) else {
            warn!(stream_id = %frame.stream_id, "frame for unknown stream dropped");
            return false;
        };
        match worker.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                warn!(
                    stream_id = %frame.stream_id,
                    timestamp = frame.timestamp,
                    "stream queue full, frame dropped"
                );
                false
            }
            Err(TrySendError::Disconnected(frame)) => {
                warn!(stream_id = %frame.stream_id, "stream worker gone, frame dropped");
                false
            }
        }
    }

    /// 阻塞送帧 (离线回放用, 不丢帧)
    pub fn submit_blocking(&self, frame: Frame) -> bool {
        match self.workers.get(&frame.stream_id) {
            Some(worker) => worker.tx.send(frame).is_ok(),
            None => {
                warn!(stream_id = %frame.stream_id, "frame for unknown stream dropped");
                false
            }
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn stream_count(&self) -> usize {
        self.workers.len()
    }

    /// 关闭所有队列并等待线程退出, 返回各流的最终统计 (按流ID排序)
    pub fn shutdown(self) -> Vec<StreamStatistics> {
        let mut stats = Vec::with_capacity(self.workers.len());
        for (stream_id, worker) in self.workers {
            drop(worker.tx);
            match worker.handle.join() {
                Ok(s) => stats.push(s),
                Err(_) => warn!(stream_id = %stream_id, "stream worker panicked"),
            }
        }
        stats.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        stats
    }
}
