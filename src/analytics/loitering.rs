//! 徘徊检测状态机
//! Per-track and per-group dwell timers
//!
//! - 单人: 相对"稳定位置"移动不超过阈值则累计停留, 超过则重新计时
//! - 聚集组: 以成员ID集合为键计时, 组散开(键不再出现)即删除
//! - 离场轨迹的状态直接删除

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::info;

use super::grouping::Group;
use crate::detection::types::{Point, TrackId};
use crate::events::{LoiteringEvent, LoiteringScope};

/// 徘徊参数
#[derive(Clone, Debug)]
pub struct LoiteringConfig {
    /// 静止判定阈值 (像素)
    pub movement_threshold: f32,
    /// 停留时间阈值 (秒)
    pub time_threshold: f64,
}

impl Default for LoiteringConfig {
    fn default() -> Self {
        Self {
            movement_threshold: 30.0,
            time_threshold: 10.0,
        }
    }
}

/// 单条轨迹的停留状态
#[derive(Clone, Debug, PartialEq)]
pub struct LoiteringState {
    pub start_time: f64,
    pub last_stable_position: Point,
    pub dwell_seconds: f64,
    pub is_loitering: bool,
}

#[derive(Clone, Debug)]
struct GroupDwell {
    start_time: f64,
    reported: bool,
}

/// 单帧徘徊结果
#[derive(Clone, Debug, Default)]
pub struct LoiteringReport {
    pub loitering_track_ids: BTreeSet<TrackId>,
    pub loitering_group_members: BTreeSet<TrackId>,
    /// 本帧新进入徘徊状态的主体
    pub events: Vec<LoiteringEvent>,
}

pub struct LoiteringStateMachine {
    config: LoiteringConfig,
    tracks: HashMap<TrackId, LoiteringState>,
    groups: HashMap<Group, GroupDwell>,
}

impl LoiteringStateMachine {
    pub fn new(config: LoiteringConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    pub fn update(
        &mut self,
        positions: &BTreeMap<TrackId, Point>,
        groups: &[Group],
        now: f64,
    ) -> LoiteringReport {
        let mut report = LoiteringReport::default();

        // 离场轨迹
        self.tracks.retain(|id, _| positions.contains_key(id));

        for (&id, &pos) in positions {
            let Some(state) = self.tracks.get_mut(&id) else {
                self.tracks.insert(
                    id,
                    LoiteringState {
                        start_time: now,
                        last_stable_position: pos,
                        dwell_seconds: 0.0,
                        is_loitering: false,
                    },
                );
                continue;
            };

            let movement = pos.distance(&state.last_stable_position);
            if movement <= self.config.movement_threshold {
                state.dwell_seconds = now - state.start_time;
                if state.dwell_seconds >= self.config.time_threshold {
                    if !state.is_loitering {
                        info!(track_id = id, dwell = state.dwell_seconds, "track loitering");
                        report.events.push(LoiteringEvent {
                            scope: LoiteringScope::Individual,
                            track_ids: vec![id],
                            started_at: state.start_time,
                            detected_at: now,
                        });
                    }
                    state.is_loitering = true;
                    report.loitering_track_ids.insert(id);
                }
            } else {
                state.start_time = now;
                state.last_stable_position = pos;
                state.dwell_seconds = 0.0;
                state.is_loitering = false;
            }
        }

        // 已散开的组
        self.groups.retain(|key, _| groups.contains(key));

        for group in groups {
            let dwell = self.groups.entry(group.clone()).or_insert(GroupDwell {
                start_time: now,
                reported: false,
            });
            if now - dwell.start_time >= self.config.time_threshold {
                if !dwell.reported {
                    info!(members = ?group, "group loitering");
                    report.events.push(LoiteringEvent {
                        scope: LoiteringScope::Group,
                        track_ids: group.iter().copied().collect(),
                        started_at: dwell.start_time,
                        detected_at: now,
                    });
                    dwell.reported = true;
                }
                report.loitering_group_members.extend(group.iter().copied());
            }
        }

        report
    }

    pub fn state(&self, id: TrackId) -> Option<&LoiteringState> {
        self.tracks.get(&id)
    }

    /// 当前处于徘徊状态的轨迹数
    pub fn loitering_count(&self) -> usize {
        self.tracks.values().filter(|s| s.is_loitering).count()
    }

    pub fn active_group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.groups.clear();
    }
}
