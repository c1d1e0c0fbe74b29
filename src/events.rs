//! 输出事件定义
//! Event objects handed to the reporting/persistence collaborator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::types::TrackId;

/// 越线事件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrossingEvent {
    pub track_id: TrackId,
    /// 流时钟秒数
    pub timestamp: f64,
}

/// 徘徊主体: 单人或聚集组
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoiteringScope {
    Individual,
    Group,
}

/// 徘徊事件 (主体首次达到停留阈值时触发一次)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoiteringEvent {
    pub scope: LoiteringScope,
    pub track_ids: Vec<TrackId>,
    pub started_at: f64,
    pub detected_at: f64,
}

impl LoiteringEvent {
    pub fn dwell_seconds(&self) -> f64 {
        self.detected_at - self.started_at
    }
}

/// 道闸告警类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// 识别成功 (未配置白名单)
    Recognized,
    /// 白名单内
    Authorized,
    /// 白名单外
    Unauthorized,
    /// 识别失败/置信度过低, 需人工复核
    Unreadable,
}

/// 道闸告警 (区域触发的一次性识别结果)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateAlert {
    pub track_id: TrackId,
    pub alert_type: AlertType,
    pub plate_or_label: Option<String>,
    pub confidence: f32,
    pub timestamp: f64,
    pub needs_manual_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// 身份事件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityEvent {
    pub track_id: TrackId,
    pub label: String,
    pub is_known: bool,
    pub confidence: f32,
    /// 重复窗口内的事件: 不持久化
    pub duplicate: bool,
    pub timestamp: DateTime<Utc>,
}

/// 统一事件封装 (JSON 以 `type` 字段区分)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SentinelEvent {
    Crossing(CrossingEvent),
    Loitering(LoiteringEvent),
    Gate(GateAlert),
    Identity(IdentityEvent),
}

impl From<CrossingEvent> for SentinelEvent {
    fn from(e: CrossingEvent) -> Self {
        SentinelEvent::Crossing(e)
    }
}

impl From<LoiteringEvent> for SentinelEvent {
    fn from(e: LoiteringEvent) -> Self {
        SentinelEvent::Loitering(e)
    }
}

impl From<GateAlert> for SentinelEvent {
    fn from(e: GateAlert) -> Self {
        SentinelEvent::Gate(e)
    }
}

impl From<IdentityEvent> for SentinelEvent {
    fn from(e: IdentityEvent) -> Self {
        SentinelEvent::Identity(e)
    }
}
