use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::PipelineError,
    models::{FilteredOrientation, OrientationSample, PostureSession, SessionTracker},
    motion::{PostureClassifier, PostureState, SampleFilter, SessionAccumulator},
    settings::PipelineSettings,
};

pub const STATUS_IDLE: &str = "Not started";
pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_CONNECTED: &str = "Connected";
pub const STATUS_DISCONNECTED: &str = "Disconnected";
pub const STATUS_DEVICE_LOST: &str = "Device disconnected";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConnectivityState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Inputs to the connectivity machine. Samples and delivery errors come from
/// the sample loop, `SensorLost` from the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    StartRequested,
    SampleReceived,
    SensorLost,
    DeliveryFailed,
    Stopped,
}

impl ConnectivityState {
    pub fn apply(self, event: ConnectivityEvent) -> ConnectivityState {
        use ConnectivityEvent::*;
        use ConnectivityState::*;

        match (self, event) {
            (Disconnected, StartRequested) => Connecting,
            (_, StartRequested) => self,
            (Connecting | Disconnected, SampleReceived) => Connected,
            (Connected, SampleReceived) => Connected,
            (Connecting | Connected, SensorLost | DeliveryFailed) => Disconnected,
            (Disconnected, SensorLost | DeliveryFailed) => Disconnected,
            (_, Stopped) => Disconnected,
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectivityState::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
        }
    }
}

/// Read-only view handed to the rendering layer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
    pub connectivity: ConnectivityState,
    pub connected: bool,
    pub status_text: String,
    pub posture_state: PostureState,
    pub pitch_history: Vec<f64>,
    pub poor_posture_duration: f64,
    pub poor_posture_percentage: u8,
    pub alert_active: bool,
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    /// Posture just escalated into the alert state.
    #[serde(rename_all = "camelCase")]
    AlertRequested { pitch: f64, duration: f64 },
    SessionCompleted(PostureSession),
    #[serde(rename_all = "camelCase")]
    PersistenceFailed { session_id: Uuid, message: String },
}

/// Result of folding one sample into the core.
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub snapshot: PipelineSnapshot,
    pub entered_alert: bool,
    pub reconnected: bool,
}

/// All mutable pipeline state. Every mutation goes through one method that
/// returns the complete snapshot, so derived values are never observed half
/// updated.
#[derive(Debug)]
pub struct PipelineCore {
    filter: SampleFilter,
    classifier: PostureClassifier,
    accumulator: SessionAccumulator,
    sessions: SessionTracker,
    orientation: FilteredOrientation,
    posture: PostureState,
    connectivity: ConnectivityState,
    status_text: String,
    running: bool,
}

impl PipelineCore {
    pub fn new(settings: &PipelineSettings, now: DateTime<Utc>) -> Self {
        Self {
            filter: SampleFilter::new(settings.smoothing_alpha),
            classifier: PostureClassifier::new(
                settings.warning_threshold_deg,
                settings.promotion_window_secs,
                now,
            ),
            accumulator: SessionAccumulator::new(
                settings.poor_posture_threshold_deg,
                settings.history_capacity,
                now,
            ),
            sessions: SessionTracker::new(),
            orientation: FilteredOrientation::level(now),
            posture: PostureState::default(),
            connectivity: ConnectivityState::Disconnected,
            status_text: STATUS_IDLE.to_string(),
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity
    }

    pub fn has_active_session(&self) -> bool {
        self.sessions.is_active()
    }

    /// Fresh session: filter seed, classifier and accumulator start over.
    pub fn begin(&mut self, now: DateTime<Utc>) -> PipelineSnapshot {
        self.reset_measurements(now);
        self.sessions.start_new_session(now);
        self.running = true;
        self.connectivity = self.connectivity.apply(ConnectivityEvent::StartRequested);
        self.status_text = STATUS_CONNECTING.to_string();
        self.snapshot()
    }

    /// Undo `begin` after the subscription could not be established.
    pub fn abort_start(&mut self, err: &PipelineError) -> PipelineSnapshot {
        self.sessions.discard();
        self.running = false;
        self.connectivity = self.connectivity.apply(ConnectivityEvent::Stopped);
        self.status_text = err.to_string();
        self.snapshot()
    }

    pub fn mark_unavailable(&mut self, err: &PipelineError) -> PipelineSnapshot {
        self.status_text = err.to_string();
        self.snapshot()
    }

    /// Stop and close any open session.
    pub fn finish(&mut self, now: DateTime<Utc>) -> (PipelineSnapshot, Option<PostureSession>) {
        self.running = false;
        self.connectivity = self.connectivity.apply(ConnectivityEvent::Stopped);
        self.status_text = STATUS_DISCONNECTED.to_string();
        let closed = self.close_session(now);
        (self.snapshot(), closed)
    }

    pub fn process_sample(&mut self, sample: &OrientationSample) -> SampleOutcome {
        let was_alert = self.posture.is_alert();
        let was_connected = self.connectivity.is_connected();

        self.orientation = self
            .filter
            .filter_sample(sample, self.orientation.pitch_deg);
        let pitch = self.orientation.pitch_deg;
        self.posture = self.classifier.classify(pitch, sample.timestamp);
        self.accumulator.tick(pitch, sample.timestamp);

        self.connectivity = self.connectivity.apply(ConnectivityEvent::SampleReceived);
        let reconnected = !was_connected && self.connectivity.is_connected();
        if reconnected {
            self.status_text = STATUS_CONNECTED.to_string();
        }

        SampleOutcome {
            snapshot: self.snapshot(),
            entered_alert: !was_alert && self.posture.is_alert(),
            reconnected,
        }
    }

    pub fn record_delivery_error(&mut self, err: &PipelineError) -> PipelineSnapshot {
        self.connectivity = self.connectivity.apply(ConnectivityEvent::DeliveryFailed);
        self.status_text = err.to_string();
        self.snapshot()
    }

    /// Watchdog probe. Returns a snapshot only when connectivity changed.
    pub fn record_watchdog(&mut self, sensor_available: bool) -> Option<PipelineSnapshot> {
        if sensor_available || self.connectivity == ConnectivityState::Disconnected {
            return None;
        }
        self.connectivity = self.connectivity.apply(ConnectivityEvent::SensorLost);
        self.status_text = STATUS_DEVICE_LOST.to_string();
        Some(self.snapshot())
    }

    /// Roll the session boundary while keeping the sensor subscription.
    pub fn roll_session(&mut self, now: DateTime<Utc>) -> (PipelineSnapshot, Option<PostureSession>) {
        let closed = self.close_session(now);
        self.reset_measurements(now);
        self.sessions.start_new_session(now);
        (self.snapshot(), closed)
    }

    pub fn end_session(&mut self, now: DateTime<Utc>) -> (PipelineSnapshot, Option<PostureSession>) {
        let closed = self.close_session(now);
        (self.snapshot(), closed)
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let totals = self.accumulator.totals();
        PipelineSnapshot {
            pitch: self.orientation.pitch_deg,
            roll: self.orientation.roll_deg,
            yaw: self.orientation.yaw_deg,
            connectivity: self.connectivity,
            connected: self.connectivity.is_connected(),
            status_text: self.status_text.clone(),
            posture_state: self.posture,
            pitch_history: self.accumulator.history_vec(),
            poor_posture_duration: totals.poor_posture_duration,
            poor_posture_percentage: totals.poor_posture_percentage,
            alert_active: self.posture.is_alert(),
            session_id: self.sessions.current_id(),
        }
    }

    fn close_session(&mut self, now: DateTime<Utc>) -> Option<PostureSession> {
        // never end before the last sample we accounted for
        let end = now.max(self.accumulator.stats().last_update_time);
        let poor = self.accumulator.totals().poor_posture_duration;
        self.sessions.end_current_session(poor, end)
    }

    fn reset_measurements(&mut self, now: DateTime<Utc>) {
        self.orientation = FilteredOrientation::level(now);
        self.classifier.reset(now);
        self.accumulator.reset(now);
        self.posture = self.classifier.state();
    }
}
