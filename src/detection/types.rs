//! 检测系统数据结构定义
//! Data structures shared by the tracking and analytics layers

use serde::{Deserialize, Serialize};
use tracing::debug;

/// 跟踪ID (单调递增,永不复用)
pub type TrackId = u64;

// ========== 数据结构 ==========

/// 二维点 (像素坐标)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// 欧氏距离
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// 检测框 (Detection bounding box)
///
/// JSON形式为 `[x1, y1, x2, y2]`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// 获取中心点
    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn center_x(&self) -> f32 {
        (self.x1 + self.x2) / 2.0
    }

    /// 底边中点 (车辆/行人的"着地点")
    pub fn bottom_center(&self) -> Point {
        Point::new(self.center_x(), self.y2)
    }

    pub fn bottom_left(&self) -> Point {
        Point::new(self.x1, self.y2)
    }

    pub fn bottom_right(&self) -> Point {
        Point::new(self.x2, self.y2)
    }

    /// 退化框: 坐标非有限值, 或宽高 <= 0
    pub fn is_degenerate(&self) -> bool {
        let finite = [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite());
        !finite || self.width() <= 0.0 || self.height() <= 0.0
    }
}

/// 单帧检测结果 (由外部检测器/识别器提供)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// 类别标签 (如 truck/person)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// 上游OCR文本 (如车牌号), 与类别分开
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Detection {
    pub fn new(bbox: BBox) -> Self {
        Self {
            bbox,
            confidence: None,
            label: None,
            text: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// 一帧输入 (单路视频流)
///
/// `timestamp` 为流时钟秒数, 同一路流内必须单调递增
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub stream_id: String,
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

// ========== 工具函数 ==========

/// 过滤退化检测框 (面积为0或负, 或含NaN), 记录日志而非报错
pub fn sanitize_detections(detections: &[Detection]) -> Vec<Detection> {
    detections
        .iter()
        .filter(|det| {
            if det.bbox.is_degenerate() {
                debug!(bbox = ?det.bbox, label = ?det.label, "dropping degenerate detection");
                false
            } else {
                true
            }
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_geometry() {
        let b = BBox::new(10.0, 20.0, 30.0, 60.0);
        assert_eq!(b.width(), 20.0);
        assert_eq!(b.height(), 40.0);
        assert_eq!(b.area(), 800.0);
        assert_eq!(b.center(), Point::new(20.0, 40.0));
        assert_eq!(b.bottom_center(), Point::new(20.0, 60.0));
        assert_eq!(b.bottom_left(), Point::new(10.0, 60.0));
        assert_eq!(b.bottom_right(), Point::new(30.0, 60.0));
    }

    #[test]
    fn test_point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_eq!(a.distance(&b), 5.0);
    }

    #[test]
    fn test_sanitize_drops_degenerate() {
        let dets = vec![
            Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0)),
            Detection::new(BBox::new(5.0, 5.0, 5.0, 20.0)),
            Detection::new(BBox::new(10.0, 10.0, 0.0, 0.0)),
            Detection::new(BBox::new(f32::NAN, 0.0, 10.0, 10.0)),
        ];
        let kept = sanitize_detections(&dets);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].bbox, BBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_detection_json_shape() {
        let json = r#"{"bbox":[1,2,3,4],"confidence":0.9,"label":"helmet"}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.bbox, BBox::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(det.confidence, Some(0.9));
        assert_eq!(det.label.as_deref(), Some("helmet"));

        assert!(det.text.is_none());

        let plate: Detection =
            serde_json::from_str(r#"{"bbox":[1,2,3,4],"label":"truck","text":"AB 123"}"#).unwrap();
        assert_eq!(plate.label.as_deref(), Some("truck"));
        assert_eq!(plate.text.as_deref(), Some("AB 123"));

        let bare: Detection = serde_json::from_str(r#"{"bbox":[0,0,5,5]}"#).unwrap();
        assert!(bare.confidence.is_none());
        assert!(bare.label.is_none());
        assert!(bare.text.is_none());
    }
}
