use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::session::seconds_between;

pub const DEFAULT_WARNING_THRESHOLD_DEG: f64 = 20.0;
pub const DEFAULT_PROMOTION_WINDOW_SECS: f64 = 2.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PostureState {
    #[serde(rename_all = "camelCase")]
    Good { posture_duration: f64 },
    #[serde(rename_all = "camelCase")]
    Warning { pitch: f64, time_above_threshold: f64 },
    #[serde(rename_all = "camelCase")]
    Alert { pitch: f64, duration: f64 },
}

impl Default for PostureState {
    fn default() -> Self {
        PostureState::Good {
            posture_duration: 0.0,
        }
    }
}

impl PostureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostureState::Good { .. } => "good",
            PostureState::Warning { .. } => "warning",
            PostureState::Alert { .. } => "alert",
        }
    }

    /// Only the alert state asks the renderer for haptic/visual feedback.
    pub fn is_alert(&self) -> bool {
        matches!(self, PostureState::Alert { .. })
    }

    pub fn is_good(&self) -> bool {
        matches!(self, PostureState::Good { .. })
    }
}

/// Good/Warning/Alert classifier over filtered pitch.
///
/// Any tick at or below the warning threshold returns to `Good` and clears
/// the dwell clock, so a pitch hovering around the threshold has to stay
/// above it for the whole promotion window before it escalates.
#[derive(Debug, Clone)]
pub struct PostureClassifier {
    warning_threshold: f64,
    promotion_window: f64,
    session_start: DateTime<Utc>,
    non_good_since: Option<DateTime<Utc>>,
    state: PostureState,
}

impl PostureClassifier {
    pub fn new(warning_threshold: f64, promotion_window: f64, now: DateTime<Utc>) -> Self {
        Self {
            warning_threshold,
            promotion_window,
            session_start: now,
            non_good_since: None,
            state: PostureState::default(),
        }
    }

    pub fn with_defaults(now: DateTime<Utc>) -> Self {
        Self::new(
            DEFAULT_WARNING_THRESHOLD_DEG,
            DEFAULT_PROMOTION_WINDOW_SECS,
            now,
        )
    }

    pub fn state(&self) -> PostureState {
        self.state
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.session_start = now;
        self.non_good_since = None;
        self.state = PostureState::default();
    }

    pub fn classify(&mut self, pitch: f64, now: DateTime<Utc>) -> PostureState {
        self.state = if pitch > self.warning_threshold {
            let since = *self.non_good_since.get_or_insert(now);
            let dwell = seconds_between(since, now);

            if dwell > self.promotion_window {
                PostureState::Alert {
                    pitch,
                    duration: dwell,
                }
            } else {
                PostureState::Warning {
                    pitch,
                    time_above_threshold: dwell,
                }
            }
        } else {
            self.non_good_since = None;
            PostureState::Good {
                posture_duration: seconds_between(self.session_start, now),
            }
        };

        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn run(pitches: &[f64]) -> Vec<PostureState> {
        let start = Utc::now();
        let mut classifier = PostureClassifier::with_defaults(start);
        pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| classifier.classify(p, start + Duration::seconds(i as i64)))
            .collect()
    }

    #[test]
    fn starts_good() {
        let classifier = PostureClassifier::with_defaults(Utc::now());
        assert_eq!(
            classifier.state(),
            PostureState::Good {
                posture_duration: 0.0
            }
        );
    }

    #[test]
    fn escalates_from_warning_to_alert_after_window() {
        let states = run(&[0.0, 25.0, 25.0, 25.0, 25.0]);

        assert_eq!(states[0], PostureState::Good { posture_duration: 0.0 });
        assert_eq!(
            states[1],
            PostureState::Warning {
                pitch: 25.0,
                time_above_threshold: 0.0
            }
        );
        assert_eq!(
            states[2],
            PostureState::Warning {
                pitch: 25.0,
                time_above_threshold: 1.0
            }
        );
        // dwell == window is not yet past it
        assert_eq!(
            states[3],
            PostureState::Warning {
                pitch: 25.0,
                time_above_threshold: 2.0
            }
        );
        assert_eq!(
            states[4],
            PostureState::Alert {
                pitch: 25.0,
                duration: 3.0
            }
        );
        assert!(states[4].is_alert());
    }

    #[test]
    fn threshold_boundary_is_good() {
        let states = run(&[20.0, 20.0, 20.0, 20.0]);
        assert!(states.iter().all(PostureState::is_good));
    }

    #[test]
    fn good_tick_resets_dwell_clock() {
        let states = run(&[25.0, 25.0, 25.0, 10.0, 25.0, 25.0]);

        assert_eq!(
            states[3],
            PostureState::Good {
                posture_duration: 3.0
            }
        );
        assert_eq!(
            states[4],
            PostureState::Warning {
                pitch: 25.0,
                time_above_threshold: 0.0
            }
        );
        assert_eq!(
            states[5],
            PostureState::Warning {
                pitch: 25.0,
                time_above_threshold: 1.0
            }
        );
    }

    #[test]
    fn oscillation_never_promotes() {
        let pitches: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 21.0 } else { 19.0 })
            .collect();
        let states = run(&pitches);
        assert!(!states.iter().any(PostureState::is_alert));
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let start = Utc::now();
        let mut classifier = PostureClassifier::with_defaults(start);
        for i in 0..5 {
            classifier.classify(40.0, start + Duration::seconds(i));
        }
        assert!(classifier.state().is_alert());

        let later = start + Duration::seconds(10);
        classifier.reset(later);
        assert_eq!(classifier.state(), PostureState::default());
        assert_eq!(
            classifier.classify(40.0, later),
            PostureState::Warning {
                pitch: 40.0,
                time_above_threshold: 0.0
            }
        );
    }

    #[test]
    fn state_serializes_with_kind_tag() {
        let json = serde_json::to_value(PostureState::Warning {
            pitch: 22.0,
            time_above_threshold: 1.5,
        })
        .unwrap();
        assert_eq!(json["kind"], "warning");
        assert_eq!(json["timeAboveThreshold"], 1.5);
    }
}
