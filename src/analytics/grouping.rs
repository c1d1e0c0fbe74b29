//! 聚集检测
//! Proximity grouping of tracked positions
//!
//! 两种策略:
//! - Anchor:     以组内第一个ID为锚点, 只比较到锚点的距离 (非传递)
//! - Transitive: 连通分量, 任意两点链式相连即同组

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::detection::types::{Point, TrackId};

/// 分组策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingPolicy {
    #[default]
    Anchor,
    Transitive,
}

/// 一个聚集组 (成员ID升序)
pub type Group = BTreeSet<TrackId>;

pub struct ProximityGroupDetector {
    group_distance: f32,
    policy: GroupingPolicy,
}

impl ProximityGroupDetector {
    pub fn new(group_distance: f32, policy: GroupingPolicy) -> Self {
        Self {
            group_distance,
            policy,
        }
    }

    pub fn group_distance(&self) -> f32 {
        self.group_distance
    }

    pub fn policy(&self) -> GroupingPolicy {
        self.policy
    }

    /// 检测聚集组, 只输出 >= 2 人的组, 按最小成员ID排序
    pub fn detect_groups(&self, positions: &BTreeMap<TrackId, Point>) -> Vec<Group> {
        let entries: Vec<(TrackId, Point)> = positions.iter().map(|(id, p)| (*id, *p)).collect();
        match self.policy {
            GroupingPolicy::Anchor => self.anchor_groups(&entries),
            GroupingPolicy::Transitive => self.transitive_groups(&entries),
        }
    }

    fn anchor_groups(&self, entries: &[(TrackId, Point)]) -> Vec<Group> {
        let mut visited = vec![false; entries.len()];
        let mut groups = Vec::new();

        for i in 0..entries.len() {
            if visited[i] {
                continue;
            }
            visited[i] = true;
            let (anchor_id, anchor) = entries[i];
            let mut group = Group::new();
            group.insert(anchor_id);

            for j in (i + 1)..entries.len() {
                if visited[j] {
                    continue;
                }
                let (id, pos) = entries[j];
                if anchor.distance(&pos) <= self.group_distance {
                    group.insert(id);
                    visited[j] = true;
                }
            }

            if group.len() >= 2 {
                groups.push(group);
            }
        }

        groups
    }

    fn transitive_groups(&self, entries: &[(TrackId, Point)]) -> Vec<Group> {
        let mut visited = vec![false; entries.len()];
        let mut groups = Vec::new();

        for start in 0..entries.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            let mut group = Group::new();
            let mut stack = vec![start];

            while let Some(i) = stack.pop() {
                group.insert(entries[i].0);
                for j in 0..entries.len() {
                    if !visited[j] && entries[i].1.distance(&entries[j].1) <= self.group_distance {
                        visited[j] = true;
                        stack.push(j);
                    }
                }
            }

            if group.len() >= 2 {
                groups.push(group);
            }
        }

        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(v: &[(TrackId, f32, f32)]) -> BTreeMap<TrackId, Point> {
        v.iter().map(|&(id, x, y)| (id, Point::new(x, y))).collect()
    }

    fn group(ids: &[TrackId]) -> Group {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_singletons_not_emitted() {
        let detector = ProximityGroupDetector::new(50.0, GroupingPolicy::Anchor);
        let groups = detector.detect_groups(&positions(&[(1, 0.0, 0.0), (2, 500.0, 0.0)]));
        assert!(groups.is_empty());
    }

    #[test]
    fn test_anchor_policy_is_not_transitive() {
        // A-B = 40, B-C = 40, A-C = 80
        let pos = positions(&[(1, 0.0, 0.0), (2, 40.0, 0.0), (3, 80.0, 0.0)]);
        let detector = ProximityGroupDetector::new(50.0, GroupingPolicy::Anchor);
        assert_eq!(detector.detect_groups(&pos), vec![group(&[1, 2])]);
    }

    #[test]
    fn test_anchor_in_middle_collects_both_sides() {
        // B为锚点时, A和C都在范围内
        let pos = positions(&[(1, 40.0, 0.0), (2, 0.0, 0.0), (3, 80.0, 0.0)]);
        let detector = ProximityGroupDetector::new(50.0, GroupingPolicy::Anchor);
        assert_eq!(detector.detect_groups(&pos), vec![group(&[1, 2, 3])]);
    }

    #[test]
    fn test_transitive_policy_chains() {
        let pos = positions(&[(1, 0.0, 0.0), (2, 40.0, 0.0), (3, 80.0, 0.0), (4, 400.0, 0.0)]);
        let detector = ProximityGroupDetector::new(50.0, GroupingPolicy::Transitive);
        assert_eq!(detector.detect_groups(&pos), vec![group(&[1, 2, 3])]);
    }

    #[test]
    fn test_multiple_groups_ordered_by_smallest_id() {
        let pos = positions(&[
            (1, 0.0, 0.0),
            (2, 300.0, 300.0),
            (3, 10.0, 10.0),
            (4, 310.0, 300.0),
        ]);
        let detector = ProximityGroupDetector::new(60.0, GroupingPolicy::Anchor);
        assert_eq!(
            detector.detect_groups(&pos),
            vec![group(&[1, 3]), group(&[2, 4])]
        );
    }
}
