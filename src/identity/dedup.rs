//! 重复事件抑制
//! Identity-keyed duplicate suppression over a rolling window

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// 抑制判定结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DedupOutcome {
    /// 窗口外, 已记录
    Accepted,
    /// 窗口内重复, 未记录
    Duplicate { last_accepted: DateTime<Utc> },
}

impl DedupOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DedupOutcome::Duplicate { .. })
    }
}

pub struct DuplicateSuppressor {
    window: Duration,
    /// 每个身份最近被接受的事件时间 (升序)
    history: HashMap<String, Vec<DateTime<Utc>>>,
}

impl DuplicateSuppressor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            history: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 判定并在接受时记录
    pub fn check_and_record(&mut self, key: &str, now: DateTime<Utc>) -> DedupOutcome {
        let window = self.window;
        let entries = self.history.entry(key.to_string()).or_default();
        entries.retain(|t| now - *t < window);

        if let Some(&last_accepted) = entries.last() {
            debug!(key, %last_accepted, "duplicate identity event suppressed");
            return DedupOutcome::Duplicate { last_accepted };
        }

        entries.push(now);
        DedupOutcome::Accepted
    }

    /// 只读判定
    pub fn is_duplicate(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.history
            .get(key)
            .map(|entries| entries.iter().any(|t| now - *t < self.window))
            .unwrap_or(false)
    }

    /// 清理窗口外的历史, 返回清理后的身份数
    pub fn purge(&mut self, now: DateTime<Utc>) -> usize {
        let window = self.window;
        self.history.retain(|_, entries| {
            entries.retain(|t| now - *t < window);
            !entries.is_empty()
        });
        self.history.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.history.len()
    }
}

impl Default for DuplicateSuppressor {
    fn default() -> Self {
        Self::new(Duration::hours(12))
    }
}
