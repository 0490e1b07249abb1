//! Posture session records.
//!
//! A `PostureSession` is created open when the pipeline starts and closed
//! exactly once. Only closed sessions reach the store, which treats them as
//! append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::motion::accumulator::percentage_of;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostureSession {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds spent past the poor-posture threshold.
    pub poor_posture_duration: f64,
}

impl PostureSession {
    /// Total length in seconds. Never negative.
    pub fn total_duration(&self) -> f64 {
        seconds_between(self.start_time, self.end_time)
    }

    pub fn poor_posture_percentage(&self) -> u8 {
        percentage_of(self.poor_posture_duration, self.total_duration())
    }
}

/// The session currently being recorded.
#[derive(Debug, Clone, PartialEq)]
struct OpenSession {
    id: Uuid,
    start_time: DateTime<Utc>,
}

/// Owns the open/closed lifecycle of at most one session.
#[derive(Debug, Default)]
pub struct SessionTracker {
    current: Option<OpenSession>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_id(&self) -> Option<Uuid> {
        self.current.as_ref().map(|session| session.id)
    }

    /// Open a fresh session. An unclosed previous session is discarded.
    pub fn start_new_session(&mut self, now: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.current = Some(OpenSession {
            id,
            start_time: now,
        });
        id
    }

    /// Close the open session. Returns `None` when nothing is open.
    pub fn end_current_session(
        &mut self,
        poor_posture_duration: f64,
        now: DateTime<Utc>,
    ) -> Option<PostureSession> {
        let open = self.current.take()?;
        let end_time = now.max(open.start_time);
        let total = seconds_between(open.start_time, end_time);

        Some(PostureSession {
            id: open.id,
            start_time: open.start_time,
            end_time,
            poor_posture_duration: poor_posture_duration.clamp(0.0, total),
        })
    }

    /// Drop the open session without producing a record.
    pub fn discard(&mut self) {
        self.current = None;
    }
}

/// Aggregate over stored sessions, used by the history view.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistoryStats {
    pub session_count: usize,
    pub total_duration: f64,
    pub total_poor_posture_duration: f64,
    /// Mean of per-session percentages, unweighted.
    pub average_poor_posture_percentage: f64,
}

impl SessionHistoryStats {
    pub fn from_sessions(sessions: &[PostureSession]) -> Self {
        if sessions.is_empty() {
            return Self::default();
        }

        let total_duration = sessions.iter().map(PostureSession::total_duration).sum();
        let total_poor_posture_duration = sessions.iter().map(|s| s.poor_posture_duration).sum();
        let percentage_sum: f64 = sessions
            .iter()
            .map(|s| f64::from(s.poor_posture_percentage()))
            .sum();

        Self {
            session_count: sessions.len(),
            total_duration,
            total_poor_posture_duration,
            average_poor_posture_percentage: percentage_sum / sessions.len() as f64,
        }
    }
}

/// Elapsed seconds at full precision; zero when `to` precedes `from`.
pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from)
        .to_std()
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}
