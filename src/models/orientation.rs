use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw reading from the headset, angles in degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrientationSample {
    pub pitch_deg: f64,
    pub roll_deg: f64,
    pub yaw_deg: f64,
    pub timestamp: DateTime<Utc>,
}

impl OrientationSample {
    pub fn new(pitch_deg: f64, roll_deg: f64, yaw_deg: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            pitch_deg,
            roll_deg,
            yaw_deg,
            timestamp,
        }
    }

    /// Pitch-only sample; roll and yaw are level.
    pub fn pitch_only(pitch_deg: f64, timestamp: DateTime<Utc>) -> Self {
        Self::new(pitch_deg, 0.0, 0.0, timestamp)
    }
}

/// A sample after smoothing. Only pitch is filtered; roll and yaw pass through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilteredOrientation {
    pub pitch_deg: f64,
    pub roll_deg: f64,
    pub yaw_deg: f64,
    pub timestamp: DateTime<Utc>,
}

impl FilteredOrientation {
    pub fn level(timestamp: DateTime<Utc>) -> Self {
        Self {
            pitch_deg: 0.0,
            roll_deg: 0.0,
            yaw_deg: 0.0,
            timestamp,
        }
    }
}
