//! 质心跟踪器
//! Centroid tracker: stable integer IDs from per-frame centroid observations
//!
//! 匹配策略:
//! 1. 计算 已有轨迹 × 新检测 的欧氏距离矩阵
//! 2. 所有配对按距离升序排序 (同距离按轨迹顺序)
//! 3. 贪心分配, 距离超过 `match_threshold` 的配对永不强制匹配
//! 4. 未匹配轨迹累计丢失帧, 超过 `max_disappeared` 后注销
//! 5. 未匹配检测注册为新轨迹

use std::collections::BTreeMap;

use tracing::debug;

use super::types::{Point, TrackId};

/// 跟踪器参数
#[derive(Clone, Debug)]
pub struct CentroidTrackerConfig {
    /// 最大允许连续丢失帧数
    pub max_disappeared: u32,
    /// 最大匹配距离 (像素)
    pub match_threshold: f32,
}

impl Default for CentroidTrackerConfig {
    fn default() -> Self {
        Self {
            max_disappeared: 30,
            match_threshold: 50.0,
        }
    }
}

/// 跟踪对象
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    /// 唯一跟踪ID
    pub id: TrackId,
    /// 当前质心
    pub centroid: Point,
    /// 注册时的质心
    pub initial_centroid: Point,
    pub first_seen: f64,
    pub last_seen: f64,
    /// 连续丢失帧数
    pub disappeared_frames: u32,
}

/// 质心跟踪器
pub struct CentroidTracker {
    config: CentroidTrackerConfig,

    /// 当前轨迹 (按ID有序, 即注册顺序)
    tracks: BTreeMap<TrackId, Track>,

    /// 下一个分配的ID
    next_id: TrackId,

    /// 本帧的 (检测下标, 轨迹ID) 对应关系
    assignments: Vec<(usize, TrackId)>,
}

impl CentroidTracker {
    pub fn new(config: CentroidTrackerConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
            assignments: Vec::new(),
        }
    }

    pub fn config(&self) -> &CentroidTrackerConfig {
        &self.config
    }

    /// 更新跟踪 (每帧调用一次, 时间戳须单调递增)
    ///
    /// 返回当前所有存活轨迹的质心
    pub fn update(&mut self, centroids: &[Point], now: f64) -> BTreeMap<TrackId, Point> {
        self.assignments.clear();

        // 空帧: 所有轨迹丢失一帧
        if centroids.is_empty() {
            let ids: Vec<TrackId> = self.tracks.keys().copied().collect();
            for id in ids {
                self.mark_disappeared(id);
            }
            return self.positions();
        }

        // 无轨迹: 全部注册
        if self.tracks.is_empty() {
            for (det_idx, centroid) in centroids.iter().enumerate() {
                let id = self.register(*centroid, now);
                self.assignments.push((det_idx, id));
            }
            return self.positions();
        }

        let track_ids: Vec<TrackId> = self.tracks.keys().copied().collect();

        // 距离矩阵 (按行展开, 行=轨迹, 列=检测)
        let mut candidates = Vec::with_capacity(track_ids.len() * centroids.len());
        for (row, id) in track_ids.iter().enumerate() {
            let existing = self.tracks[id].centroid;
            for (col, centroid) in centroids.iter().enumerate() {
                candidates.push((existing.distance(centroid), row, col));
            }
        }

        // 稳定排序: 同距离保持行优先顺序
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut used_rows = vec![false; track_ids.len()];
        let mut used_cols = vec![false; centroids.len()];

        for (distance, row, col) in candidates {
            if distance > self.config.match_threshold {
                break;
            }
            if used_rows[row] || used_cols[col] {
                continue;
            }
            used_rows[row] = true;
            used_cols[col] = true;

            let id = track_ids[row];
            if let Some(track) = self.tracks.get_mut(&id) {
                track.centroid = centroids[col];
                track.last_seen = now;
                track.disappeared_frames = 0;
            }
            self.assignments.push((col, id));
        }

        // 未匹配轨迹 → 标记丢失
        for (row, used) in used_rows.iter().enumerate() {
            if !used {
                self.mark_disappeared(track_ids[row]);
            }
        }

        // 未匹配检测 → 新建轨迹
        for (col, used) in used_cols.iter().enumerate() {
            if !used {
                let id = self.register(centroids[col], now);
                self.assignments.push((col, id));
            }
        }

        self.assignments.sort_unstable();
        self.positions()
    }

    fn register(&mut self, centroid: Point, now: f64) -> TrackId {
        let id = self.next_id;
        self.next_id += 1;
        self.tracks.insert(
            id,
            Track {
                id,
                centroid,
                initial_centroid: centroid,
                first_seen: now,
                last_seen: now,
                disappeared_frames: 0,
            },
        );
        debug!(track_id = id, x = centroid.x, y = centroid.y, "track registered");
        id
    }

    fn deregister(&mut self, id: TrackId) {
        if self.tracks.remove(&id).is_some() {
            debug!(track_id = id, "track deregistered");
        }
    }

    fn mark_disappeared(&mut self, id: TrackId) {
        let expired = match self.tracks.get_mut(&id) {
            Some(track) => {
                track.disappeared_frames += 1;
                track.disappeared_frames > self.config.max_disappeared
            }
            None => false,
        };
        if expired {
            self.deregister(id);
        }
    }

    /// 当前所有轨迹质心
    pub fn positions(&self) -> BTreeMap<TrackId, Point> {
        self.tracks
            .iter()
            .map(|(id, track)| (*id, track.centroid))
            .collect()
    }

    /// 本帧 (检测下标, 轨迹ID), 按检测下标排序
    pub fn assignments(&self) -> &[(usize, TrackId)] {
        &self.assignments
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// 获取当前跟踪数量
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// 累计注册过的轨迹数
    pub fn registered_count(&self) -> u64 {
        self.next_id - 1
    }

    /// 清除所有轨迹 (ID计数器不回退, 保证ID永不复用)
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.assignments.clear();
    }
}

impl Default for CentroidTracker {
    fn default() -> Self {
        Self::new(CentroidTrackerConfig::default())
    }
}
