use anyhow::{bail, Context, Result};
use log::info;
use tokio::{sync::mpsc, task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{pipeline::MotionPipeline, store::SessionStore};

use super::{
    loop_worker::{sample_loop, watchdog_loop},
    source::SensorReading,
};

/// Owns the sample and watchdog tasks of one subscription.
#[derive(Default)]
pub struct SensingController {
    sample_handle: Option<JoinHandle<()>>,
    watchdog_handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SensingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.cancel_token.is_some()
    }

    pub fn start_sensing<S: SessionStore>(
        &mut self,
        pipeline: MotionPipeline<S>,
        readings: mpsc::Receiver<SensorReading>,
        watchdog_period: Duration,
    ) -> Result<()> {
        if self.is_active() {
            bail!("sensing already active");
        }

        let cancel_token = CancellationToken::new();

        let sample_handle = tokio::spawn(sample_loop(
            pipeline.clone(),
            readings,
            cancel_token.clone(),
        ));
        let watchdog_handle = tokio::spawn(watchdog_loop(
            pipeline,
            watchdog_period,
            cancel_token.clone(),
        ));

        info!(
            "sensing started (watchdog every {} ms)",
            watchdog_period.as_millis()
        );

        self.sample_handle = Some(sample_handle);
        self.watchdog_handle = Some(watchdog_handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Cancel both loops and wait for them. A no-op when nothing is running.
    pub async fn stop_sensing(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.sample_handle.take() {
            handle.await.context("sample loop task failed to join")?;
        }
        if let Some(handle) = self.watchdog_handle.take() {
            handle.await.context("watchdog task failed to join")?;
        }
        Ok(())
    }
}
