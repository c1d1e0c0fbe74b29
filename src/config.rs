//! 系统配置 - 通过JSON文件调整参数

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analytics::{CrossingDirection, GroupingPolicy, LoiteringConfig, ZoneConfig};
use crate::detection::CentroidTrackerConfig;
use crate::retry::{Backoff, RetryPolicy};

/// 跟踪参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    pub max_disappeared: u32, // 最大丢失帧数
    pub match_threshold: f32, // 最大匹配距离(像素)
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            max_disappeared: 30,
            match_threshold: 50.0,
        }
    }
}

/// 聚集参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingSection {
    pub group_distance: f32,
    pub policy: GroupingPolicy,
}

impl Default for GroupingSection {
    fn default() -> Self {
        Self {
            group_distance: 100.0,
            policy: GroupingPolicy::Anchor,
        }
    }
}

/// 徘徊参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoiteringSection {
    pub movement_threshold: f32,  // 静止判定阈值(像素)
    pub time_threshold_secs: f64, // 停留时间阈值(秒)
}

impl Default for LoiteringSection {
    fn default() -> Self {
        Self {
            movement_threshold: 30.0,
            time_threshold_secs: 10.0,
        }
    }
}

/// 越线计数参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineCrossingSection {
    pub line_position_ratio: f32,
    pub line_x: Option<f32>, // 显式线坐标, 优先于比例
    pub direction: CrossingDirection,
}

impl Default for LineCrossingSection {
    fn default() -> Self {
        Self {
            line_position_ratio: 0.5,
            line_x: None,
            direction: CrossingDirection::LeftToRight,
        }
    }
}

/// 道闸参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSection {
    pub zone_bottom_fraction: f32, // 画面底部比例
    pub session_timeout_secs: f64,
    pub min_confidence: f32,
    pub authorized_plates: Vec<String>,
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            zone_bottom_fraction: 0.3,
            session_timeout_secs: 300.0,
            min_confidence: 0.5,
            authorized_plates: Vec::new(),
        }
    }
}

/// 身份会话参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub spatial_tolerance: f32,
    pub session_timeout_secs: i64,
    pub duplicate_window_secs: i64, // 默认12小时
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            spatial_tolerance: 400.0,
            session_timeout_secs: 30,
            duplicate_window_secs: 12 * 60 * 60,
        }
    }
}

/// 外部调用重试参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            multiplier: 2.0,
            max_backoff_ms: 5000,
        }
    }
}

/// 功能开关
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    pub loitering: bool,
    pub line_crossing: bool,
    pub gate: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            loitering: true,
            line_crossing: true,
            gate: false,
        }
    }
}

/// 系统参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub tracker: TrackerSection,
    pub grouping: GroupingSection,
    pub loitering: LoiteringSection,
    pub line_crossing: LineCrossingSection,
    pub gate: GateSection,
    pub identity: IdentitySection,
    pub retry: RetrySection,
    pub features: FeatureToggles,
    pub queue_capacity: usize, // 每路流的帧队列长度
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerSection::default(),
            grouping: GroupingSection::default(),
            loitering: LoiteringSection::default(),
            line_crossing: LineCrossingSection::default(),
            gate: GateSection::default(),
            identity: IdentitySection::default(),
            retry: RetrySection::default(),
            features: FeatureToggles::default(),
            queue_capacity: 120,
        }
    }
}

impl SentinelConfig {
    /// 从JSON文件加载配置, 文件不存在时写入默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "config file missing, writing defaults");
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, json).with_context(|| format!("failed to write config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracker.match_threshold <= 0.0 {
            bail!("tracker.match_threshold must be positive");
        }
        if self.grouping.group_distance <= 0.0 {
            bail!("grouping.group_distance must be positive");
        }
        if self.loitering.movement_threshold < 0.0 || self.loitering.time_threshold_secs <= 0.0 {
            bail!("loitering thresholds must be positive");
        }
        let ratio = self.line_crossing.line_position_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            bail!("line_crossing.line_position_ratio must be in (0, 1], got {ratio}");
        }
        let fraction = self.gate.zone_bottom_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            bail!("gate.zone_bottom_fraction must be in (0, 1], got {fraction}");
        }
        if self.gate.session_timeout_secs <= 0.0 || self.identity.session_timeout_secs <= 0 {
            bail!("session timeouts must be positive");
        }
        if self.identity.spatial_tolerance <= 0.0 || self.identity.duplicate_window_secs <= 0 {
            bail!("identity tolerance and duplicate window must be positive");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        Ok(())
    }

    pub fn tracker_config(&self) -> CentroidTrackerConfig {
        CentroidTrackerConfig {
            max_disappeared: self.tracker.max_disappeared,
            match_threshold: self.tracker.match_threshold,
        }
    }

    pub fn loitering_config(&self) -> LoiteringConfig {
        LoiteringConfig {
            movement_threshold: self.loitering.movement_threshold,
            time_threshold: self.loitering.time_threshold_secs,
        }
    }

    pub fn zone_config(&self) -> ZoneConfig {
        ZoneConfig {
            session_timeout: self.gate.session_timeout_secs,
            min_confidence: self.gate.min_confidence,
            authorized: self
                .gate
                .authorized_plates
                .iter()
                .cloned()
                .collect::<HashSet<_>>(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(self.retry.initial_backoff_ms),
                multiplier: self.retry.multiplier,
                max: Duration::from_millis(self.retry.max_backoff_ms),
            },
        }
    }

    pub fn identity_session_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.identity.session_timeout_secs)
    }

    pub fn duplicate_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.identity.duplicate_window_secs)
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!(
            max_disappeared = self.tracker.max_disappeared,
            match_threshold = self.tracker.match_threshold,
            group_distance = self.grouping.group_distance,
            policy = ?self.grouping.policy,
            loiter_secs = self.loitering.time_threshold_secs,
            line_ratio = self.line_crossing.line_position_ratio,
            gate = self.features.gate,
            "active configuration"
        );
    }
}
