use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use anyhow::{bail, Result};
use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::models::OrientationSample;

use super::source::{MotionSensor, SensorFault, SensorReading};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

const CHANNEL_CAPACITY: usize = 256;

/// Phases of the synthetic posture cycle, as (seconds, target pitch).
const SYNTHETIC_PROFILE: [(f64, f64); 4] = [
    (10.0, 4.0),   // upright
    (6.0, 28.0),   // leaning into the screen
    (5.0, -30.0),  // slumped back
    (4.0, -8.0),   // recovering
];
const PITCH_NOISE_DEG: f64 = 1.5;

/// In-process sensor. Readings are injected with [`push`](Self::push) or
/// generated by [`drive_synthetic`].
pub struct SimulatedSensor {
    available: AtomicBool,
    sender: Mutex<Option<mpsc::Sender<SensorReading>>>,
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SimulatedSensor {
    pub fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
            sender: Mutex::new(None),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self) -> bool {
        self.sender_slot().is_some()
    }

    /// Deliver one reading. Returns `false` when nobody is subscribed.
    pub async fn push(&self, reading: SensorReading) -> bool {
        let sender = self.sender_slot().clone();
        match sender {
            Some(tx) => tx.send(reading).await.is_ok(),
            None => false,
        }
    }

    pub async fn push_sample(&self, sample: OrientationSample) -> bool {
        self.push(Ok(sample)).await
    }

    pub async fn push_fault(&self, message: &str) -> bool {
        self.push(Err(SensorFault::new(message))).await
    }

    fn sender_slot(&self) -> MutexGuard<'_, Option<mpsc::Sender<SensorReading>>> {
        match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MotionSensor for SimulatedSensor {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<SensorReading>> {
        if !self.is_available() {
            bail!("simulated sensor is not available");
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        *self.sender_slot() = Some(tx);
        Ok(rx)
    }

    fn unsubscribe(&self) {
        self.sender_slot().take();
    }
}

/// Target pitch of the synthetic profile `elapsed_secs` into the cycle.
pub fn synthetic_pitch(elapsed_secs: f64) -> f64 {
    let cycle: f64 = SYNTHETIC_PROFILE.iter().map(|(secs, _)| secs).sum();
    let mut offset = elapsed_secs.rem_euclid(cycle);
    for (secs, pitch) in SYNTHETIC_PROFILE {
        if offset < secs {
            return pitch;
        }
        offset -= secs;
    }
    SYNTHETIC_PROFILE[0].1
}

/// Feed `sensor` with a noisy slouch/recover cycle until `cancel` fires.
pub async fn drive_synthetic(
    sensor: Arc<SimulatedSensor>,
    sample_period: time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(sample_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut rng = StdRng::from_entropy();
    let started = time::Instant::now();
    let mut delivered: u64 = 0;

    log_info!(
        "synthetic motion source running at {:.1} Hz",
        1.0 / sample_period.as_secs_f64()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let elapsed = started.elapsed().as_secs_f64();
                let pitch = synthetic_pitch(elapsed) + rng.gen_range(-PITCH_NOISE_DEG..PITCH_NOISE_DEG);
                let roll = rng.gen_range(-3.0..3.0);
                let yaw = (elapsed * 2.0).sin() * 10.0;
                let sample = OrientationSample::new(pitch, roll, yaw, Utc::now());
                if sensor.push_sample(sample).await {
                    delivered += 1;
                }
            }
            _ = cancel.cancelled() => {
                log_debug!("synthetic motion source stopping after {delivered} samples");
                break;
            }
        }
    }
}
