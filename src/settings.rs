use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::log_warn;
use crate::motion::{
    accumulator::{DEFAULT_HISTORY_CAPACITY, DEFAULT_POOR_POSTURE_THRESHOLD_DEG},
    classifier::{DEFAULT_PROMOTION_WINDOW_SECS, DEFAULT_WARNING_THRESHOLD_DEG},
    filter::DEFAULT_SMOOTHING_ALPHA,
};

const ENABLE_LOGS: bool = true;

/// Upper bound for the nominal sample rate.
pub const MAX_SAMPLE_RATE_HZ: f64 = 1_000.0;

/// Tunables for the motion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub smoothing_alpha: f64,
    pub warning_threshold_deg: f64,
    pub promotion_window_secs: f64,
    /// Statistics bound, stricter than (and independent of) the warning threshold.
    pub poor_posture_threshold_deg: f64,
    pub history_capacity: usize,
    pub watchdog_interval_ms: u64,
    /// Pause between stop and start on restart so the sensor handle is released.
    pub restart_delay_ms: u64,
    /// Nominal delivery rate; only the synthetic sensor uses it.
    pub sample_rate_hz: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            warning_threshold_deg: DEFAULT_WARNING_THRESHOLD_DEG,
            promotion_window_secs: DEFAULT_PROMOTION_WINDOW_SECS,
            poor_posture_threshold_deg: DEFAULT_POOR_POSTURE_THRESHOLD_DEG,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            watchdog_interval_ms: 1_000,
            restart_delay_ms: 500,
            sample_rate_hz: 60.0,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.smoothing_alpha) {
            bail!(
                "smoothingAlpha must be within [0, 1], got {}",
                self.smoothing_alpha
            );
        }
        if !self.warning_threshold_deg.is_finite() || !self.poor_posture_threshold_deg.is_finite() {
            bail!("posture thresholds must be finite");
        }
        if !(self.promotion_window_secs > 0.0) {
            bail!(
                "promotionWindowSecs must be positive, got {}",
                self.promotion_window_secs
            );
        }
        if self.history_capacity == 0 {
            bail!("historyCapacity must be at least 1");
        }
        if self.watchdog_interval_ms == 0 {
            bail!("watchdogIntervalMs must be positive");
        }
        if !(self.sample_rate_hz > 0.0 && self.sample_rate_hz <= MAX_SAMPLE_RATE_HZ) {
            bail!(
                "sampleRateHz must be within (0, {MAX_SAMPLE_RATE_HZ}], got {}",
                self.sample_rate_hz
            );
        }
        Ok(())
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_rate_hz)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    pipeline: PipelineSettings,
}

/// JSON-file-backed settings. Missing or unreadable files fall back to defaults.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            let parsed: UserSettings = match serde_json::from_str(&contents) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log_warn!(
                        "Ignoring unparsable settings at {}: {err}",
                        path.display()
                    );
                    UserSettings::default()
                }
            };
            if let Err(err) = parsed.pipeline.validate() {
                log_warn!("Ignoring invalid pipeline settings: {err:#}");
                UserSettings::default()
            } else {
                parsed
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn pipeline(&self) -> PipelineSettings {
        self.read().pipeline.clone()
    }

    pub fn update_pipeline(&self, settings: PipelineSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        guard.pipeline = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
