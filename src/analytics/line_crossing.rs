//! 虚拟线计数 (生产计数)
//! One-directional virtual line crossing counter
//!
//! 每条轨迹最多计数一次, 直到 `reset()`

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detection::types::{BBox, TrackId};
use crate::events::CrossingEvent;

/// 计数方向
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingDirection {
    #[default]
    LeftToRight,
    RightToLeft,
}

impl CrossingDirection {
    /// `previous < line <= current` (左→右) 或其镜像
    fn crossed(self, previous: f32, current: f32, line_x: f32) -> bool {
        match self {
            CrossingDirection::LeftToRight => previous < line_x && line_x <= current,
            CrossingDirection::RightToLeft => previous > line_x && line_x >= current,
        }
    }
}

/// 单帧计数结果
#[derive(Clone, Debug, Default)]
pub struct CrossingReport {
    pub new_crossings: Vec<CrossingEvent>,
    pub total_crossings: usize,
}

pub struct LineCrossingCounter {
    /// 线位置占帧宽比例 (未显式给出线坐标时使用)
    line_position_ratio: f32,
    direction: CrossingDirection,
    /// 每条轨迹上一帧的中心x
    last_x: HashMap<TrackId, f32>,
    crossed_ids: HashSet<TrackId>,
}

impl LineCrossingCounter {
    pub fn new(line_position_ratio: f32, direction: CrossingDirection) -> Self {
        Self {
            line_position_ratio,
            direction,
            last_x: HashMap::new(),
            crossed_ids: HashSet::new(),
        }
    }

    pub fn line_x(&self, frame_width: u32, line_x: Option<f32>) -> f32 {
        line_x.unwrap_or(frame_width as f32 * self.line_position_ratio)
    }

    /// 检测越线
    ///
    /// 无跟踪ID的框被忽略
    pub fn detect(
        &mut self,
        boxes: &[(BBox, Option<TrackId>)],
        frame_width: u32,
        line_x: Option<f32>,
        now: f64,
    ) -> CrossingReport {
        let line_x = self.line_x(frame_width, line_x);
        let mut new_crossings = Vec::new();

        for (bbox, track_id) in boxes {
            let Some(id) = *track_id else {
                continue;
            };
            let current_x = bbox.center_x();

            if let Some(&previous_x) = self.last_x.get(&id) {
                if self.direction.crossed(previous_x, current_x, line_x)
                    && self.crossed_ids.insert(id)
                {
                    info!(track_id = id, line_x, total = self.crossed_ids.len(), "line crossed");
                    new_crossings.push(CrossingEvent {
                        track_id: id,
                        timestamp: now,
                    });
                }
            }
            self.last_x.insert(id, current_x);
        }

        CrossingReport {
            new_crossings,
            total_crossings: self.total_crossings(),
        }
    }

    pub fn total_crossings(&self) -> usize {
        self.crossed_ids.len()
    }

    pub fn has_crossed(&self, id: TrackId) -> bool {
        self.crossed_ids.contains(&id)
    }

    /// 丢弃已离场轨迹的位置记录 (已计数集合保持不变)
    pub fn retain_tracks(&mut self, alive: impl Fn(TrackId) -> bool) {
        self.last_x.retain(|id, _| alive(*id));
    }

    /// 清零计数与位置
    pub fn reset(&mut self) {
        debug!(total = self.crossed_ids.len(), "line counter reset");
        self.crossed_ids.clear();
        self.last_x.clear();
    }
}

impl Default for LineCrossingCounter {
    fn default() -> Self {
        Self::new(0.5, CrossingDirection::LeftToRight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_x(x: f32, id: Option<TrackId>) -> (BBox, Option<TrackId>) {
        (BBox::new(x - 10.0, 0.0, x + 10.0, 20.0), id)
    }

    #[test]
    fn test_left_to_right_counted_once() {
        let mut counter = LineCrossingCounter::default();
        counter.detect(&[at_x(300.0, Some(1))], 640, Some(320.0), 0.0);
        let report = counter.detect(&[at_x(340.0, Some(1))], 640, Some(320.0), 0.1);
        assert_eq!(report.new_crossings.len(), 1);
        assert_eq!(report.new_crossings[0].track_id, 1);
        assert_eq!(report.total_crossings, 1);

        // 右→左 再 左→右: 不重复计数
        counter.detect(&[at_x(300.0, Some(1))], 640, Some(320.0), 0.2);
        let report = counter.detect(&[at_x(340.0, Some(1))], 640, Some(320.0), 0.3);
        assert!(report.new_crossings.is_empty());
        assert_eq!(report.total_crossings, 1);
    }

    #[test]
    fn test_right_to_left_ignored() {
        let mut counter = LineCrossingCounter::default();
        counter.detect(&[at_x(340.0, Some(1))], 640, None, 0.0);
        let report = counter.detect(&[at_x(300.0, Some(1))], 640, None, 0.1);
        assert!(report.new_crossings.is_empty());
        assert_eq!(report.total_crossings, 0);
    }

    #[test]
    fn test_line_from_ratio_and_boundary() {
        let mut counter = LineCrossingCounter::new(0.25, CrossingDirection::LeftToRight);
        assert_eq!(counter.line_x(800, None), 200.0);
        // 恰好落在线上算越线
        counter.detect(&[at_x(150.0, Some(4))], 800, None, 0.0);
        let report = counter.detect(&[at_x(200.0, Some(4))], 800, None, 0.1);
        assert_eq!(report.total_crossings, 1);
    }

    #[test]
    fn test_first_sighting_never_counts() {
        let mut counter = LineCrossingCounter::default();
        let report = counter.detect(&[at_x(400.0, Some(1))], 640, None, 0.0);
        assert_eq!(report.total_crossings, 0);
    }

    #[test]
    fn test_boxes_without_id_ignored() {
        let mut counter = LineCrossingCounter::default();
        counter.detect(&[at_x(300.0, None)], 640, None, 0.0);
        let report = counter.detect(&[at_x(340.0, None)], 640, None, 0.1);
        assert_eq!(report.total_crossings, 0);
    }

    #[test]
    fn test_reset_allows_recount() {
        let mut counter = LineCrossingCounter::default();
        counter.detect(&[at_x(300.0, Some(1))], 640, None, 0.0);
        counter.detect(&[at_x(340.0, Some(1))], 640, None, 0.1);
        assert_eq!(counter.total_crossings(), 1);

        counter.reset();
        assert_eq!(counter.total_crossings(), 0);
        assert!(!counter.has_crossed(1));

        counter.detect(&[at_x(300.0, Some(1))], 640, None, 0.2);
        let report = counter.detect(&[at_x(340.0, Some(1))], 640, None, 0.3);
        assert_eq!(report.new_crossings.len(), 1);
        assert_eq!(report.total_crossings, 1);
    }

    #[test]
    fn test_right_to_left_direction() {
        let mut counter = LineCrossingCounter::new(0.5, CrossingDirection::RightToLeft);
        counter.detect(&[at_x(340.0, Some(2))], 640, None, 0.0);
        let report = counter.detect(&[at_x(300.0, Some(2))], 640, None, 0.1);
        assert_eq!(report.total_crossings, 1);
    }
}
