pub mod analytics; // 行为分析: 聚集/徘徊/越线/区域触发
pub mod config; // 系统配置参数
pub mod detection; // 检测输入与质心跟踪
pub mod error; // 错误类型
pub mod events; // 输出事件
pub mod identity; // 身份会话与重复抑制
pub mod pipeline; // 单路流管线与工作线程
pub mod retry; // 外部调用重试策略
pub mod scheduler; // 定时任务
pub mod sink; // 事件上报与会话持久化

pub use crate::config::SentinelConfig;
pub use crate::detection::{BBox, CentroidTracker, Detection, Frame, Point, TrackId};
pub use crate::events::{
    AlertType, CrossingEvent, GateAlert, IdentityEvent, LoiteringEvent, SentinelEvent,
};
pub use crate::identity::{IdentityRegistry, IdentitySessionCache};
pub use crate::pipeline::{FrameEvents, StreamPipeline, StreamStatistics, StreamWorkers};
pub use crate::sink::{EventSink, JsonLinesSink, MemorySink, SessionStore};
