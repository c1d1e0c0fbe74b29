/// 行为分析 (Analytics)
///
/// 基于跟踪结果派生事件, 不依赖具体检测模型
/// - grouping:      聚集检测
/// - loitering:     徘徊计时
/// - line_crossing: 越线计数
/// - zone:          区域一次性触发 (道闸/车牌)
pub mod grouping;
pub mod line_crossing;
pub mod loitering;
pub mod zone;

pub use grouping::{Group, GroupingPolicy, ProximityGroupDetector};
pub use line_crossing::{CrossingDirection, CrossingReport, LineCrossingCounter};
pub use loitering::{LoiteringConfig, LoiteringReport, LoiteringState, LoiteringStateMachine};
pub use zone::{
    DetectionTextRecognizer, Recognition, Recognizer, RetryingRecognizer, TriggerRequest, Zone,
    ZoneConfig, ZoneSession, ZoneTriggerManager,
};
