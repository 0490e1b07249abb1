use crate::models::{FilteredOrientation, OrientationSample};

pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.2;

/// Single-pole low-pass filter for the pitch channel.
///
/// Stateless: the caller owns the previous output. Non-finite inputs are not
/// sanitized and propagate into the result.
#[derive(Debug, Clone, Copy)]
pub struct SampleFilter {
    alpha: f64,
}

impl Default for SampleFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_ALPHA)
    }
}

impl SampleFilter {
    /// `alpha` is the weight given to the newest sample, in `[0, 1]`.
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }

    pub fn apply(&self, current: f64, previous: f64) -> f64 {
        previous * (1.0 - self.alpha) + current * self.alpha
    }

    pub fn filter_sample(
        &self,
        sample: &OrientationSample,
        previous_pitch: f64,
    ) -> FilteredOrientation {
        FilteredOrientation {
            pitch_deg: self.apply(sample.pitch_deg, previous_pitch),
            roll_deg: sample.roll_deg,
            yaw_deg: sample.yaw_deg,
            timestamp: sample.timestamp,
        }
    }
}
