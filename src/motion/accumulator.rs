use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::session::seconds_between;

pub const DEFAULT_POOR_POSTURE_THRESHOLD_DEG: f64 = -22.0;
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Rounded share of `part` in `whole`, in 0..=100. Zero when `whole` is not positive.
pub fn percentage_of(part: f64, whole: f64) -> u8 {
    if whole > 0.0 {
        (100.0 * part / whole).round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    /// Seconds.
    pub total_session_time: f64,
    /// Seconds, never more than `total_session_time`.
    pub poor_posture_duration: f64,
    pub poor_posture_start_time: Option<DateTime<Utc>>,
}

impl SessionStats {
    fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            session_start_time: now,
            last_update_time: now,
            total_session_time: 0.0,
            poor_posture_duration: 0.0,
            poor_posture_start_time: None,
        }
    }
}

/// Totals produced by one tick, read together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccumulatorTotals {
    pub total_session_time: f64,
    pub poor_posture_duration: f64,
    pub poor_posture_percentage: u8,
}

/// Time-weighted session tally plus a bounded history of filtered pitch.
///
/// Time advances by the wall-clock gap between ticks, not by the nominal
/// sample rate, so bursty or dropped delivery still adds up correctly.
#[derive(Debug, Clone)]
pub struct SessionAccumulator {
    poor_threshold: f64,
    capacity: usize,
    stats: SessionStats,
    history: VecDeque<f64>,
}

impl SessionAccumulator {
    pub fn new(poor_threshold: f64, capacity: usize, now: DateTime<Utc>) -> Self {
        Self {
            poor_threshold,
            capacity,
            stats: SessionStats::starting_at(now),
            history: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn with_defaults(now: DateTime<Utc>) -> Self {
        Self::new(
            DEFAULT_POOR_POSTURE_THRESHOLD_DEG,
            DEFAULT_HISTORY_CAPACITY,
            now,
        )
    }

    pub fn tick(&mut self, filtered_pitch: f64, now: DateTime<Utc>) -> AccumulatorTotals {
        // a clock stepping backwards contributes nothing
        let delta = seconds_between(self.stats.last_update_time, now);
        self.stats.total_session_time += delta;
        self.stats.last_update_time = now.max(self.stats.last_update_time);

        if filtered_pitch < self.poor_threshold {
            self.stats.poor_posture_duration += delta;
            self.stats.poor_posture_start_time.get_or_insert(now);
        } else {
            self.stats.poor_posture_start_time = None;
        }

        self.history.push_back(filtered_pitch);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }

        self.totals()
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.stats = SessionStats::starting_at(now);
        self.history.clear();
    }

    pub fn totals(&self) -> AccumulatorTotals {
        AccumulatorTotals {
            total_session_time: self.stats.total_session_time,
            poor_posture_duration: self.stats.poor_posture_duration,
            poor_posture_percentage: self.poor_posture_percentage(),
        }
    }

    pub fn poor_posture_percentage(&self) -> u8 {
        percentage_of(
            self.stats.poor_posture_duration,
            self.stats.total_session_time,
        )
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn history(&self) -> &VecDeque<f64> {
        &self.history
    }

    pub fn history_vec(&self) -> Vec<f64> {
        self.history.iter().copied().collect()
    }
}
