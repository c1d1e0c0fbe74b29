//! 区域触发 (道闸/车牌识别)
//! One-shot zone trigger: fire an external recognizer once per track
//!
//! 核心规则:
//! 1. 框的底边中点/左下角/右下角任一落入区域即视为进入
//! 2. 每条轨迹的会话内最多触发一次, 无论识别成功与否 (避免逐帧重试)
//! 3. 识别失败 → Unreadable + 人工复核标记
//! 4. 会话超时无更新即删除, 同时扣减分类计数

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::detection::types::{BBox, Detection, Point, TrackId};
use crate::error::CollaboratorError;
use crate::events::{AlertType, GateAlert};
use crate::retry::RetryPolicy;

// ========== 区域 ==========

/// 矩形区域 (像素坐标, 边界包含)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Zone {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Zone {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 画面底部 `fraction` 比例的整宽区域
    pub fn bottom_fraction(frame_width: u32, frame_height: u32, fraction: f32) -> Self {
        let h = frame_height as f32;
        let fraction = fraction.clamp(0.0, 1.0);
        Self::new(0.0, h * (1.0 - fraction), frame_width as f32, h)
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x1 && p.x <= self.x2 && p.y >= self.y1 && p.y <= self.y2
    }

    /// 底边中点、左下角、右下角任一在区域内
    pub fn contains_bbox(&self, bbox: &BBox) -> bool {
        [bbox.bottom_center(), bbox.bottom_left(), bbox.bottom_right()]
            .iter()
            .any(|p| self.contains(p))
    }
}

// ========== 识别协作方 ==========

/// 触发请求 (交给外部识别器)
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerRequest {
    pub track_id: TrackId,
    /// 裁剪区域
    pub bbox: BBox,
    /// 检测类别 (如 truck)
    pub category: Option<String>,
    /// 上游已给出的OCR文本
    pub text: Option<String>,
    pub detection_confidence: Option<f32>,
    pub timestamp: f64,
}

/// 识别结果 (车牌文本或身份标签)
#[derive(Clone, Debug, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

/// 外部识别器 (OCR / 人脸核验等), 可能阻塞
pub trait Recognizer: Send + Sync {
    fn recognize(&self, request: &TriggerRequest) -> Result<Recognition, CollaboratorError>;
}

/// 带重试的识别器包装
pub struct RetryingRecognizer<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: Recognizer> RetryingRecognizer<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<R: Recognizer> Recognizer for RetryingRecognizer<R> {
    fn recognize(&self, request: &TriggerRequest) -> Result<Recognition, CollaboratorError> {
        self.policy
            .call(
                |_| self.inner.recognize(request),
                CollaboratorError::is_retryable,
            )
            .map_err(|e| e.into_inner())
    }
}

/// 上游检测器已给出OCR文本时, 直接复用该文本
pub struct DetectionTextRecognizer;

impl Recognizer for DetectionTextRecognizer {
    fn recognize(&self, request: &TriggerRequest) -> Result<Recognition, CollaboratorError> {
        match &request.text {
            Some(text) => Ok(Recognition {
                text: text.clone(),
                confidence: request.detection_confidence.unwrap_or(1.0),
            }),
            None => Err(CollaboratorError::Rejected(format!(
                "track {} has no upstream text",
                request.track_id
            ))),
        }
    }
}

// ========== 会话管理 ==========

#[derive(Clone, Debug)]
pub struct ZoneConfig {
    /// 会话超时 (秒)
    pub session_timeout: f64,
    /// 低于该置信度视为无法识别
    pub min_confidence: f32,
    /// 白名单 (已归一化), 为空时不做授权判定
    pub authorized: HashSet<String>,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            session_timeout: 300.0,
            min_confidence: 0.5,
            authorized: HashSet::new(),
        }
    }
}

/// 每条轨迹的区域会话
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneSession {
    pub track_id: TrackId,
    pub category: Option<String>,
    pub first_seen: f64,
    pub zone_entered_at: Option<f64>,
    pub trigger_fired: bool,
    pub last_seen: f64,
    pub frames_seen: u64,
}

pub struct ZoneTriggerManager {
    zone: Zone,
    config: ZoneConfig,
    sessions: HashMap<TrackId, ZoneSession>,
    /// 各类别的活跃会话数
    category_counts: HashMap<String, usize>,
    triggers_fired: u64,
}

impl ZoneTriggerManager {
    pub fn new(zone: Zone, mut config: ZoneConfig) -> Self {
        config.authorized = config
            .authorized
            .iter()
            .map(|p| normalize_plate(p))
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            zone,
            config,
            sessions: HashMap::new(),
            category_counts: HashMap::new(),
            triggers_fired: 0,
        }
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    /// 记录一次观测; 首次进入区域且未触发过时返回触发请求 (此时会话已标记为已触发)
    ///
    /// 返回的请求可在锁外交给识别器, 再用 `complete` 生成告警
    pub fn observe(
        &mut self,
        track_id: TrackId,
        detection: &Detection,
        now: f64,
    ) -> Option<TriggerRequest> {
        if !self.sessions.contains_key(&track_id) {
            let category = detection.label.clone();
            if let Some(c) = &category {
                *self.category_counts.entry(c.clone()).or_insert(0) += 1;
            }
            debug!(track_id, ?category, "zone session created");
            self.sessions.insert(
                track_id,
                ZoneSession {
                    track_id,
                    category,
                    first_seen: now,
                    zone_entered_at: None,
                    trigger_fired: false,
                    last_seen: now,
                    frames_seen: 0,
                },
            );
        }
        let session = self.sessions.get_mut(&track_id)?;
        session.last_seen = now;
        session.frames_seen += 1;

        if !self.zone.contains_bbox(&detection.bbox) {
            return None;
        }
        if session.zone_entered_at.is_none() {
            session.zone_entered_at = Some(now);
        }
        if session.trigger_fired {
            return None;
        }

        session.trigger_fired = true;
        self.triggers_fired += 1;
        info!(track_id, "zone entered, firing trigger");

        Some(TriggerRequest {
            track_id,
            bbox: detection.bbox,
            category: detection.label.clone(),
            text: detection.text.clone(),
            detection_confidence: detection.confidence,
            timestamp: now,
        })
    }

    /// 把识别结果转为告警; 失败不向上传播
    pub fn complete(
        &self,
        request: &TriggerRequest,
        result: Result<Recognition, CollaboratorError>,
    ) -> GateAlert {
        let category = self
            .sessions
            .get(&request.track_id)
            .and_then(|s| s.category.clone());

        let unreadable = |text: Option<String>, confidence: f32| GateAlert {
            track_id: request.track_id,
            alert_type: AlertType::Unreadable,
            plate_or_label: text,
            confidence,
            timestamp: request.timestamp,
            needs_manual_review: true,
            category: category.clone(),
        };

        let recognition = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    track_id = request.track_id,
                    error = %e,
                    "recognizer failed, flagged for manual review"
                );
                return unreadable(None, 0.0);
            }
        };

        let text = normalize_plate(&recognition.text);
        if text.is_empty() || recognition.confidence < self.config.min_confidence {
            warn!(
                track_id = request.track_id,
                raw = %recognition.text,
                confidence = recognition.confidence,
                "reading unusable, flagged for manual review"
            );
            let raw = (!text.is_empty()).then_some(text);
            return unreadable(raw, recognition.confidence);
        }

        let alert_type = if self.config.authorized.is_empty() {
            AlertType::Recognized
        } else if self.config.authorized.contains(&text) {
            AlertType::Authorized
        } else {
            AlertType::Unauthorized
        };
        info!(track_id = request.track_id, plate = %text, ?alert_type, "gate alert");

        GateAlert {
            track_id: request.track_id,
            alert_type,
            plate_or_label: Some(text),
            confidence: recognition.confidence,
            timestamp: request.timestamp,
            needs_manual_review: false,
            category,
        }
    }

    /// 顺序调用: 观测 + 识别 + 生成告警
    pub fn update(
        &mut self,
        track_id: TrackId,
        detection: &Detection,
        now: f64,
        recognizer: &dyn Recognizer,
    ) -> Option<GateAlert> {
        let request = self.observe(track_id, detection, now)?;
        let result = recognizer.recognize(&request);
        Some(self.complete(&request, result))
    }

    /// 清理超时会话, 返回清理数量
    pub fn expire_old_sessions(&mut self, now: f64, timeout_seconds: f64) -> usize {
        let expired: Vec<TrackId> = self
            .sessions
            .values()
            .filter(|s| now - s.last_seen > timeout_seconds)
            .map(|s| s.track_id)
            .collect();

        for id in &expired {
            let Some(session) = self.sessions.remove(id) else {
                continue;
            };
            if let Some(category) = &session.category {
                if let Some(count) = self.category_counts.get_mut(category) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.category_counts.remove(category);
                    }
                }
            }
            debug!(track_id = id, fired = session.trigger_fired, "zone session expired");
        }

        expired.len()
    }

    /// 按配置的超时清理
    pub fn expire(&mut self, now: f64) -> usize {
        self.expire_old_sessions(now, self.config.session_timeout)
    }

    pub fn session(&self, track_id: TrackId) -> Option<&ZoneSession> {
        self.sessions.get(&track_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn category_counts(&self) -> &HashMap<String, usize> {
        &self.category_counts
    }

    pub fn triggers_fired(&self) -> u64 {
        self.triggers_fired
    }
}

/// 车牌归一化: 大写, 仅保留ASCII字母数字
pub fn normalize_plate(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedRecognizer {
        text: &'static str,
        confidence: f32,
        calls: AtomicU32,
    }

    impl FixedRecognizer {
        fn new(text: &'static str, confidence: f32) -> Self {
            Self {
                text,
                confidence,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl Recognizer for FixedRecognizer {
        fn recognize(&self, _request: &TriggerRequest) -> Result<Recognition, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Recognition {
                text: self.text.to_string(),
                confidence: self.confidence,
            })
        }
    }

    struct FailingRecognizer {
        calls: AtomicU32,
    }

    impl Recognizer for FailingRecognizer {
        fn recognize(&self, _request: &TriggerRequest) -> Result<Recognition, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CollaboratorError::Unavailable("ocr offline".into()))
        }
    }

    fn zone() -> Zone {
        // 640x480 画面底部 30%: y >= 336
        Zone::bottom_fraction(640, 480, 0.3)
    }

    fn outside() -> BBox {
        BBox::new(100.0, 100.0, 200.0, 200.0)
    }

    fn inside() -> BBox {
        BBox::new(100.0, 300.0, 200.0, 400.0)
    }

    fn det(bbox: BBox, category: Option<&str>) -> Detection {
        let det = Detection::new(bbox);
        match category {
            Some(c) => det.with_label(c),
            None => det,
        }
    }

    #[test]
    fn test_zone_bottom_points() {
        let z = zone();
        approx::assert_relative_eq!(z.y1, 336.0, epsilon = 1e-3);
        assert!(!z.contains_bbox(&outside()));
        assert!(z.contains_bbox(&inside()));
        // 只有右下角在区域内
        let partial = BBox::new(600.0, 300.0, 700.0, 340.0);
        assert!(z.contains_bbox(&partial));
    }

    #[test]
    fn test_trigger_fires_once_per_track() {
        let recognizer = FixedRecognizer::new("ab-123 c", 0.9);
        let mut mgr = ZoneTriggerManager::new(zone(), ZoneConfig::default());

        assert!(mgr.update(1, &det(outside(), Some("car")), 0.0, &recognizer).is_none());
        let alert = mgr.update(1, &det(inside(), Some("car")), 1.0, &recognizer).unwrap();
        assert_eq!(alert.alert_type, AlertType::Recognized);
        assert_eq!(alert.plate_or_label.as_deref(), Some("AB123C"));
        assert_eq!(alert.category.as_deref(), Some("car"));
        assert!(!alert.needs_manual_review);

        for t in 2..10 {
            assert!(mgr.update(1, &det(inside(), Some("car")), t as f64, &recognizer).is_none());
        }
        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.session(1).unwrap().zone_entered_at, Some(1.0));
        assert_eq!(mgr.triggers_fired(), 1);
    }

    #[test]
    fn test_failure_marks_fired_and_flags_review() {
        let recognizer = FailingRecognizer {
            calls: AtomicU32::new(0),
        };
        let mut mgr = ZoneTriggerManager::new(zone(), ZoneConfig::default());

        let alert = mgr.update(5, &det(inside(), None), 0.0, &recognizer).unwrap();
        assert_eq!(alert.alert_type, AlertType::Unreadable);
        assert!(alert.needs_manual_review);
        assert!(alert.plate_or_label.is_none());

        // 不在后续帧重试
        assert!(mgr.update(5, &det(inside(), None), 0.5, &recognizer).is_none());
        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
        assert!(mgr.session(5).unwrap().trigger_fired);
    }

    #[test]
    fn test_low_confidence_is_unreadable() {
        let recognizer = FixedRecognizer::new("XYZ9", 0.2);
        let mut mgr = ZoneTriggerManager::new(zone(), ZoneConfig::default());
        let alert = mgr.update(1, &det(inside(), None), 0.0, &recognizer).unwrap();
        assert_eq!(alert.alert_type, AlertType::Unreadable);
        assert_eq!(alert.plate_or_label.as_deref(), Some("XYZ9"));
        assert!(alert.needs_manual_review);
    }

    #[test]
    fn test_authorized_list() {
        let config = ZoneConfig {
            authorized: ["ab 123".to_string()].into_iter().collect(),
            ..ZoneConfig::default()
        };
        let mut mgr = ZoneTriggerManager::new(zone(), config);

        let ok = FixedRecognizer::new("AB123", 0.95);
        let alert = mgr.update(1, &det(inside(), None), 0.0, &ok).unwrap();
        assert_eq!(alert.alert_type, AlertType::Authorized);

        let stranger = FixedRecognizer::new("ZZ999", 0.95);
        let alert = mgr.update(2, &det(inside(), None), 0.0, &stranger).unwrap();
        assert_eq!(alert.alert_type, AlertType::Unauthorized);
    }

    #[test]
    fn test_expiry_decrements_category_counts() {
        let recognizer = FixedRecognizer::new("AB1", 0.9);
        let mut mgr = ZoneTriggerManager::new(zone(), ZoneConfig::default());
        mgr.update(1, &det(outside(), Some("truck")), 0.0, &recognizer);
        mgr.update(2, &det(outside(), Some("truck")), 0.0, &recognizer);
        mgr.update(3, &det(outside(), Some("car")), 200.0, &recognizer);
        assert_eq!(mgr.category_counts().get("truck"), Some(&2));

        assert_eq!(mgr.expire(301.0), 2);
        assert_eq!(mgr.active_sessions(), 1);
        assert!(mgr.category_counts().get("truck").is_none());
        assert_eq!(mgr.category_counts().get("car"), Some(&1));
    }

    #[test]
    fn test_expired_track_session_starts_fresh() {
        let recognizer = FixedRecognizer::new("AB1", 0.9);
        let mut mgr = ZoneTriggerManager::new(zone(), ZoneConfig::default());
        assert!(mgr.update(1, &det(inside(), None), 0.0, &recognizer).is_some());
        assert_eq!(mgr.expire_old_sessions(100.0, 30.0), 1);
        assert!(mgr.update(1, &det(inside(), None), 101.0, &recognizer).is_some());
    }

    #[test]
    fn test_split_observe_complete() {
        let mut mgr = ZoneTriggerManager::new(zone(), ZoneConfig::default());
        let van = det(inside(), Some("van")).with_confidence(0.8);
        let request = mgr.observe(9, &van, 4.0).unwrap();
        assert_eq!(request.track_id, 9);
        assert_eq!(request.category.as_deref(), Some("van"));
        assert!(mgr.observe(9, &van, 4.1).is_none());

        let timeout = CollaboratorError::Timeout(std::time::Duration::from_secs(3));
        let alert = mgr.complete(&request, Err(timeout));
        assert_eq!(alert.alert_type, AlertType::Unreadable);
        assert_eq!(alert.timestamp, 4.0);
    }

    #[test]
    fn test_retrying_recognizer_gives_up() {
        let inner = FailingRecognizer {
            calls: AtomicU32::new(0),
        };
        let wrapped = RetryingRecognizer::new(
            inner,
            RetryPolicy {
                max_attempts: 3,
                backoff: crate::retry::Backoff::None,
            },
        );
        let mut mgr = ZoneTriggerManager::new(zone(), ZoneConfig::default());
        let alert = mgr.update(1, &det(inside(), None), 0.0, &wrapped).unwrap();
        assert_eq!(alert.alert_type, AlertType::Unreadable);
        assert_eq!(wrapped.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_detection_text_recognizer() {
        let mut mgr = ZoneTriggerManager::new(zone(), ZoneConfig::default());
        let truck = det(inside(), Some("truck"))
            .with_text("KA01")
            .with_confidence(0.7);
        let alert = mgr.update(1, &truck, 0.0, &DetectionTextRecognizer).unwrap();
        assert_eq!(alert.plate_or_label.as_deref(), Some("KA01"));
        assert_eq!(alert.category.as_deref(), Some("truck"));
        assert_eq!(alert.confidence, 0.7);
        assert_eq!(mgr.category_counts().get("truck"), Some(&1));
        assert!(mgr.category_counts().get("KA01").is_none());
    }

    #[test]
    fn test_category_is_not_a_plate() {
        let mut mgr = ZoneTriggerManager::new(zone(), ZoneConfig::default());
        let truck = det(inside(), Some("truck")).with_confidence(0.9);
        let alert = mgr.update(1, &truck, 0.0, &DetectionTextRecognizer).unwrap();
        assert_eq!(alert.alert_type, AlertType::Unreadable);
        assert!(alert.needs_manual_review);
        assert!(alert.plate_or_label.is_none());
        assert_eq!(alert.category.as_deref(), Some("truck"));
    }
}
