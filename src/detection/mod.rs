/// 检测输入与跟踪 (Detection input & tracking)
///
/// - types:   检测框/帧/轨迹ID等公共数据结构
/// - tracker: 质心跟踪器, 为每帧检测分配稳定ID
pub mod tracker;
pub mod types;

pub use tracker::{CentroidTracker, CentroidTrackerConfig, Track};
pub use types::{sanitize_detections, BBox, Detection, Frame, Point, TrackId};
