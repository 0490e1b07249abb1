use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, watch, Mutex};
use uuid::Uuid;

use crate::{
    error::PipelineError,
    models::{OrientationSample, PostureSession},
    motion::PostureState,
    sensing::{MotionSensor, SensingController, SensorFault},
    settings::PipelineSettings,
    store::SessionStore,
};

use super::state::{PipelineCore, PipelineEvent, PipelineSnapshot};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const EVENT_CAPACITY: usize = 64;

struct Publisher {
    snapshots: watch::Sender<PipelineSnapshot>,
    events: broadcast::Sender<PipelineEvent>,
}

impl Publisher {
    /// Notify watchers only when something actually changed.
    fn snapshot(&self, snapshot: PipelineSnapshot) {
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn event(&self, event: PipelineEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Orchestrates filter, classifier and accumulator over a sensor stream and
/// publishes the derived state.
///
/// Cloning yields another handle to the same pipeline. Control operations
/// (`start`, `stop`, `restart`) are expected to come from one caller at a time.
pub struct MotionPipeline<S: SessionStore> {
    core: Arc<Mutex<PipelineCore>>,
    sensing: Arc<Mutex<SensingController>>,
    sensor: Arc<dyn MotionSensor>,
    store: S,
    settings: PipelineSettings,
    publisher: Arc<Publisher>,
}

impl<S: SessionStore> Clone for MotionPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            sensing: Arc::clone(&self.sensing),
            sensor: Arc::clone(&self.sensor),
            store: self.store.clone(),
            settings: self.settings.clone(),
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<S: SessionStore> MotionPipeline<S> {
    /// Fails when `settings` do not pass [`PipelineSettings::validate`].
    pub fn new(
        sensor: Arc<dyn MotionSensor>,
        store: S,
        settings: PipelineSettings,
    ) -> Result<Self> {
        settings
            .validate()
            .context("invalid motion pipeline settings")?;

        let core = PipelineCore::new(&settings, Utc::now());
        let (snapshots, _) = watch::channel(core.snapshot());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            core: Arc::new(Mutex::new(core)),
            sensing: Arc::new(Mutex::new(SensingController::new())),
            sensor,
            store,
            settings,
            publisher: Arc::new(Publisher { snapshots, events }),
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.publisher.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<PipelineSnapshot> {
        self.publisher.snapshots.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.publisher.events.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.core.lock().await.is_running()
    }

    pub async fn start(&self) -> Result<(), PipelineError> {
        let mut sensing = self.sensing.lock().await;
        if sensing.is_active() {
            return Err(PipelineError::AlreadyRunning);
        }

        if !self.sensor.is_available() {
            let err = PipelineError::SensorUnavailable;
            log_warn!("cannot start motion pipeline: {err}");
            let snapshot = self.core.lock().await.mark_unavailable(&err);
            self.publisher.snapshot(snapshot);
            return Err(err);
        }

        {
            let mut core = self.core.lock().await;
            let snapshot = core.begin(Utc::now());
            log_info!(
                "motion pipeline starting, session {}",
                snapshot
                    .session_id
                    .map(|id| id.to_string())
                    .unwrap_or_default()
            );
            self.publisher.snapshot(snapshot);
        }

        let readings = match self.sensor.subscribe() {
            Ok(readings) => readings,
            Err(err) => {
                log_error!("motion sensor subscription failed: {err:#}");
                return Err(self.abort_start().await);
            }
        };

        if let Err(err) =
            sensing.start_sensing(self.clone(), readings, self.settings.watchdog_interval())
        {
            log_error!("failed to start sensing loops: {err:#}");
            self.sensor.unsubscribe();
            return Err(self.abort_start().await);
        }

        Ok(())
    }

    /// Stop delivery and close the current session. Safe to call repeatedly.
    pub async fn stop(&self) {
        {
            let mut sensing = self.sensing.lock().await;
            if let Err(err) = sensing.stop_sensing().await {
                log_error!("failed to stop sensing cleanly: {err:#}");
            }
        }
        self.sensor.unsubscribe();

        let closed = {
            let mut core = self.core.lock().await;
            let (snapshot, closed) = core.finish(Utc::now());
            self.publisher.snapshot(snapshot);
            closed
        };

        if let Some(session) = closed {
            log_info!("motion pipeline stopped, closing session {}", session.id);
            self.persist(session).await;
        }
    }

    /// Stop, give the platform time to release the sensor, then start again.
    pub async fn restart(&self) -> Result<(), PipelineError> {
        self.stop().await;
        tokio::time::sleep(self.settings.restart_delay()).await;
        self.start().await
    }

    /// Fold one sample into the pipeline and publish the result.
    pub async fn on_sample(&self, sample: OrientationSample) -> PipelineSnapshot {
        let mut core = self.core.lock().await;
        if !core.is_running() {
            log_debug!("dropping sample delivered after stop");
            return core.snapshot();
        }

        let outcome = core.process_sample(&sample);
        if outcome.reconnected {
            log_info!("motion sensor connected");
        }
        self.publisher.snapshot(outcome.snapshot.clone());

        if outcome.entered_alert {
            if let PostureState::Alert { pitch, duration } = outcome.snapshot.posture_state {
                log_info!("posture alert: pitch {pitch:.1} deg for {duration:.1} s");
                self.publisher
                    .event(PipelineEvent::AlertRequested { pitch, duration });
            }
        }

        outcome.snapshot
    }

    pub async fn on_delivery_error(&self, fault: SensorFault) {
        let err = PipelineError::SensorDelivery(fault.message);
        log_warn!("{err}");
        let mut core = self.core.lock().await;
        if !core.is_running() {
            return;
        }
        let snapshot = core.record_delivery_error(&err);
        self.publisher.snapshot(snapshot);
    }

    /// Watchdog probe: flips to disconnected if the sensor vanished.
    pub async fn check_sensor(&self) {
        let available = self.sensor.is_available();
        let mut core = self.core.lock().await;
        if !core.is_running() {
            return;
        }
        if let Some(snapshot) = core.record_watchdog(available) {
            log_warn!("motion sensor reported unavailable; marking disconnected");
            self.publisher.snapshot(snapshot);
        }
    }

    /// Close the current session (if any) and open a fresh one without
    /// dropping the sensor subscription. Returns the new session id.
    pub async fn start_new_session(&self) -> Option<Uuid> {
        let (snapshot, closed) = {
            let mut core = self.core.lock().await;
            if !core.is_running() {
                log_debug!("start_new_session ignored: pipeline not running");
                return None;
            }
            let (snapshot, closed) = core.roll_session(Utc::now());
            self.publisher.snapshot(snapshot.clone());
            (snapshot, closed)
        };

        if let Some(session) = closed {
            self.persist(session).await;
        }
        snapshot.session_id
    }

    /// Close the current session. `None` when no session is open.
    pub async fn end_current_session(&self) -> Option<PostureSession> {
        let closed = {
            let mut core = self.core.lock().await;
            let (snapshot, closed) = core.end_session(Utc::now());
            self.publisher.snapshot(snapshot);
            closed
        }?;

        self.persist(closed.clone()).await;
        Some(closed)
    }

    async fn abort_start(&self) -> PipelineError {
        let err = PipelineError::SensorUnavailable;
        let snapshot = self.core.lock().await.abort_start(&err);
        self.publisher.snapshot(snapshot);
        err
    }

    /// Best-effort hand-off to the store. Failures are logged and broadcast,
    /// never retried or returned.
    async fn persist(&self, session: PostureSession) {
        self.publisher
            .event(PipelineEvent::SessionCompleted(session.clone()));

        match self.store.append_session(session.clone()).await {
            Ok(()) => log_info!(
                "saved session {} ({:.0} s, {}% poor)",
                session.id,
                session.total_duration(),
                session.poor_posture_percentage()
            ),
            Err(err) => {
                let err = PipelineError::PersistenceWrite(format!("{err:#}"));
                log_error!("{err}");
                self.publisher.event(PipelineEvent::PersistenceFailed {
                    session_id: session.id,
                    message: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::ConnectivityState,
        sensing::SimulatedSensor,
        store::MemorySessionStore,
    };
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            smoothing_alpha: 1.0,
            watchdog_interval_ms: 20,
            restart_delay_ms: 10,
            ..PipelineSettings::default()
        }
    }

    fn pipeline(
        available: bool,
    ) -> (
        MotionPipeline<MemorySessionStore>,
        Arc<SimulatedSensor>,
        MemorySessionStore,
    ) {
        let sensor = Arc::new(SimulatedSensor::new(available));
        let store = MemorySessionStore::new();
        let pipeline =
            MotionPipeline::new(sensor.clone(), store.clone(), fast_settings()).unwrap();
        (pipeline, sensor, store)
    }

    async fn wait_until(
        rx: &mut watch::Receiver<PipelineSnapshot>,
        predicate: impl FnMut(&PipelineSnapshot) -> bool,
    ) -> PipelineSnapshot {
        timeout(WAIT, rx.wait_for(predicate))
            .await
            .expect("timed out waiting for snapshot")
            .expect("snapshot sender dropped")
            .clone()
    }

    async fn next_event(rx: &mut broadcast::Receiver<PipelineEvent>) -> PipelineEvent {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn push_pitch(sensor: &SimulatedSensor, pitch: f64) {
        assert!(
            sensor
                .push_sample(OrientationSample::pitch_only(pitch, Utc::now()))
                .await
        );
    }

    #[tokio::test]
    async fn unavailable_sensor_then_restart_connects() {
        let (pipeline, sensor, store) = pipeline(false);

        assert_eq!(pipeline.start().await, Err(PipelineError::SensorUnavailable));
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.status_text, "Device motion not available");
        assert!(!snapshot.connected);
        assert!(!pipeline.is_running().await);

        sensor.set_available(true);
        pipeline.restart().await.expect("restart should succeed");
        assert_eq!(pipeline.snapshot().connectivity, ConnectivityState::Connecting);

        let mut rx = pipeline.subscribe_snapshots();
        push_pitch(&sensor, 3.0).await;
        let connected = wait_until(&mut rx, |s| s.connected).await;
        assert_eq!(connected.status_text, "Connected");

        pipeline.stop().await;
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn stop_twice_matches_stop_once() {
        let (pipeline, sensor, store) = pipeline(true);
        pipeline.start().await.unwrap();
        let mut rx = pipeline.subscribe_snapshots();
        push_pitch(&sensor, 1.0).await;
        wait_until(&mut rx, |s| s.connected).await;

        pipeline.stop().await;
        let once = pipeline.snapshot();
        let stored_once = store.len();

        pipeline.stop().await;
        assert_eq!(pipeline.snapshot(), once);
        assert_eq!(store.len(), stored_once);
        assert_eq!(stored_once, 1);
        assert!(!sensor.is_subscribed());
        assert_eq!(once.connectivity, ConnectivityState::Disconnected);
    }

    #[tokio::test]
    async fn history_follows_delivery_order() {
        let (pipeline, sensor, _store) = pipeline(true);
        pipeline.start().await.unwrap();
        let mut rx = pipeline.subscribe_snapshots();

        let pitches: Vec<f64> = (0..50).map(|i| (i as f64) * 0.5 - 10.0).collect();
        for &pitch in &pitches {
            push_pitch(&sensor, pitch).await;
        }

        let snapshot = wait_until(&mut rx, |s| s.pitch_history.len() == pitches.len()).await;
        assert_eq!(snapshot.pitch_history, pitches);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn delivery_error_disconnects_until_next_sample() {
        let (pipeline, sensor, _store) = pipeline(true);
        pipeline.start().await.unwrap();
        let mut rx = pipeline.subscribe_snapshots();

        push_pitch(&sensor, 0.0).await;
        wait_until(&mut rx, |s| s.connected).await;

        assert!(sensor.push_fault("bus reset").await);
        let failed = wait_until(&mut rx, |s| !s.connected).await;
        assert_eq!(failed.status_text, "Motion update error: bus reset");
        assert!(pipeline.is_running().await);

        push_pitch(&sensor, 0.0).await;
        wait_until(&mut rx, |s| s.connected).await;
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn watchdog_flags_vanished_sensor() {
        let (pipeline, sensor, _store) = pipeline(true);
        pipeline.start().await.unwrap();
        let mut rx = pipeline.subscribe_snapshots();

        push_pitch(&sensor, 0.0).await;
        wait_until(&mut rx, |s| s.connected).await;

        sensor.set_available(false);
        let lost = wait_until(&mut rx, |s| !s.connected).await;
        assert_eq!(lost.status_text, "Device disconnected");
        assert_eq!(lost.connectivity, ConnectivityState::Disconnected);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn sustained_forward_lean_requests_alert() {
        let (pipeline, sensor, _store) = pipeline(true);
        let mut events = pipeline.subscribe_events();
        pipeline.start().await.unwrap();

        let base = Utc::now();
        for i in 0..=3 {
            let sample = OrientationSample::pitch_only(40.0, base + ChronoDuration::seconds(i));
            assert!(sensor.push_sample(sample).await);
        }

        match next_event(&mut events).await {
            PipelineEvent::AlertRequested { pitch, duration } => {
                assert_eq!(pitch, 40.0);
                assert!((duration - 3.0).abs() < 1e-9);
            }
            other => panic!("expected alert, got {other:?}"),
        }
        assert!(pipeline.snapshot().alert_active);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn stop_persists_session_totals() {
        let (pipeline, sensor, store) = pipeline(true);
        let mut events = pipeline.subscribe_events();
        let base = Utc::now();
        pipeline.start().await.unwrap();
        let session_id = pipeline.snapshot().session_id.expect("session opened");
        let mut rx = pipeline.subscribe_snapshots();

        for i in 1..=10 {
            let pitch = if i <= 5 { -40.0 } else { 0.0 };
            let sample = OrientationSample::pitch_only(pitch, base + ChronoDuration::seconds(i));
            assert!(sensor.push_sample(sample).await);
        }
        let live = wait_until(&mut rx, |s| s.pitch_history.len() == 10).await;
        assert_eq!(live.poor_posture_percentage, 50);

        pipeline.stop().await;

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert_eq!(session.id, session_id);
        assert!((session.poor_posture_duration - 5.0).abs() < 0.5);
        assert!((session.total_duration() - 10.0).abs() < 0.5);
        assert_eq!(session.poor_posture_percentage(), 50);

        match next_event(&mut events).await {
            PipelineEvent::SessionCompleted(completed) => assert_eq!(completed.id, session_id),
            other => panic!("expected session completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn persistence_failure_is_reported_not_raised() {
        let (pipeline, _sensor, store) = pipeline(true);
        store.set_fail_writes(true);
        let mut events = pipeline.subscribe_events();

        pipeline.start().await.unwrap();
        pipeline.stop().await;

        assert!(matches!(
            next_event(&mut events).await,
            PipelineEvent::SessionCompleted(_)
        ));
        match next_event(&mut events).await {
            PipelineEvent::PersistenceFailed { message, .. } => {
                assert!(message.starts_with("Failed to save session"));
            }
            other => panic!("expected persistence failure, got {other:?}"),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn session_boundaries_roll_without_resubscribing() {
        let (pipeline, sensor, store) = pipeline(true);
        pipeline.start().await.unwrap();
        let first = pipeline.snapshot().session_id.unwrap();

        let second = pipeline.start_new_session().await.expect("running pipeline");
        assert_ne!(first, second);
        assert_eq!(store.len(), 1);
        assert!(sensor.is_subscribed());

        let ended = pipeline.end_current_session().await.expect("open session");
        assert_eq!(ended.id, second);
        assert!(pipeline.end_current_session().await.is_none());
        assert_eq!(store.len(), 2);
        assert_eq!(pipeline.snapshot().session_id, None);

        pipeline.stop().await;
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (pipeline, _sensor, _store) = pipeline(true);
        pipeline.start().await.unwrap();
        assert_eq!(pipeline.start().await, Err(PipelineError::AlreadyRunning));
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn ending_session_on_idle_pipeline_is_noop() {
        let (pipeline, _sensor, store) = pipeline(true);
        assert!(pipeline.end_current_session().await.is_none());
        assert!(pipeline.start_new_session().await.is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn rejects_settings_that_would_stall_sensing() {
        let sensor = Arc::new(SimulatedSensor::new(true));
        let zero_watchdog = PipelineSettings {
            watchdog_interval_ms: 0,
            ..fast_settings()
        };
        assert!(
            MotionPipeline::new(sensor.clone(), MemorySessionStore::new(), zero_watchdog).is_err()
        );

        let wild_alpha = PipelineSettings {
            smoothing_alpha: -0.5,
            ..fast_settings()
        };
        assert!(
            MotionPipeline::new(sensor.clone(), MemorySessionStore::new(), wild_alpha).is_err()
        );

        let empty_history = PipelineSettings {
            history_capacity: 0,
            ..fast_settings()
        };
        assert!(
            MotionPipeline::new(sensor, MemorySessionStore::new(), empty_history).is_err()
        );
    }
}
