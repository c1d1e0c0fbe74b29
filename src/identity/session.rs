//! 身份会话缓存
//! Identity continuity across recognition cycles via spatial proximity
//!
//! 每帧都对全库重新比对代价太高, 因此用"新框中心到已有会话上次框中心的距离"
//! 延续身份: 同一路流内最近且距离小于容差的会话即视为同一人.
//! 容差故意放宽 (默认400px), 以容忍远处小脸与持续移动.
//! 不同流的像素坐标互不可比, 跨流不做空间匹配; 跟踪ID全局唯一.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detection::types::{BBox, TrackId};

/// 单个身份会话
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentitySession {
    pub track_id: TrackId,
    #[serde(default)]
    pub stream_id: String,
    pub label: String,
    pub is_known: bool,
    pub confidence: f32,
    pub bbox: BBox,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// 外部记录引用 (如考勤记录ID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    /// 会话内标签变更次数
    #[serde(default)]
    pub label_changes: u32,
}

pub struct IdentitySessionCache {
    sessions: BTreeMap<TrackId, IdentitySession>,
    next_id: TrackId,
    /// 空间延续容差 (像素)
    spatial_tolerance: f32,
    session_timeout: Duration,
}

impl IdentitySessionCache {
    pub fn new(spatial_tolerance: f32, session_timeout: Duration) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_id: 1,
            spatial_tolerance,
            session_timeout,
        }
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// 更新或新建会话, 返回会话的跟踪ID
    pub fn update_session(
        &mut self,
        stream_id: &str,
        label: &str,
        is_known: bool,
        confidence: f32,
        bbox: BBox,
        now: DateTime<Utc>,
    ) -> TrackId {
        let center = bbox.center();
        let nearest = self
            .sessions
            .values()
            .filter(|s| s.stream_id == stream_id)
            .map(|s| (s.track_id, s.bbox.center().distance(&center)))
            .filter(|(_, d)| *d < self.spatial_tolerance)
            .fold(None, |best: Option<(TrackId, f32)>, cur| match best {
                Some(b) if b.1 <= cur.1 => Some(b),
                _ => Some(cur),
            });

        if let Some(session) = nearest.and_then(|(id, _)| self.sessions.get_mut(&id)) {
            if session.label != label {
                info!(
                    track_id = session.track_id,
                    from = %session.label,
                    to = %label,
                    "identity label changed within session"
                );
                session.label = label.to_string();
                session.label_changes += 1;
            }
            session.is_known = is_known;
            session.confidence = confidence;
            session.bbox = bbox;
            session.last_seen = now;
            return session.track_id;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.sessions.insert(
            id,
            IdentitySession {
                track_id: id,
                stream_id: stream_id.to_string(),
                label: label.to_string(),
                is_known,
                confidence,
                bbox,
                first_seen: now,
                last_seen: now,
                external_ref: None,
                label_changes: 0,
            },
        );
        debug!(track_id = id, stream_id, label, is_known, "identity session created");
        id
    }

    /// 移除超时会话并返回 (由调用方持久化)
    pub fn expire_old_sessions(
        &mut self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<IdentitySession> {
        let expired: Vec<TrackId> = self
            .sessions
            .values()
            .filter(|s| now - s.last_seen > timeout)
            .map(|s| s.track_id)
            .collect();

        expired
            .iter()
            .filter_map(|id| self.sessions.remove(id))
            .collect()
    }

    /// 按配置的超时清理
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<IdentitySession> {
        self.expire_old_sessions(now, self.session_timeout)
    }

    /// 移除全部会话 (停机/回放结束)
    pub fn drain(&mut self) -> Vec<IdentitySession> {
        std::mem::take(&mut self.sessions).into_values().collect()
    }

    pub fn set_external_ref(&mut self, track_id: TrackId, external_ref: impl Into<String>) -> bool {
        match self.sessions.get_mut(&track_id) {
            Some(session) => {
                session.external_ref = Some(external_ref.into());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, track_id: TrackId) -> Option<&IdentitySession> {
        self.sessions.get(&track_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &IdentitySession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for IdentitySessionCache {
    fn default() -> Self {
        Self::new(400.0, Duration::seconds(30))
    }
}
