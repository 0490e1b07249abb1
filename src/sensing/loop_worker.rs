use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{pipeline::MotionPipeline, store::SessionStore};

use super::source::{SensorFault, SensorReading};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Drain the sensor stream into the pipeline, one reading at a time.
///
/// Each reading is fully processed and published before the next is pulled,
/// so publication order always matches delivery order.
pub async fn sample_loop<S: SessionStore>(
    pipeline: MotionPipeline<S>,
    mut readings: mpsc::Receiver<SensorReading>,
    cancel_token: CancellationToken,
) {
    let mut delivered: u64 = 0;
    let mut faults: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("sample loop shutting down ({delivered} samples, {faults} faults)");
                break;
            }
            reading = readings.recv() => match reading {
                Some(Ok(sample)) => {
                    pipeline.on_sample(sample).await;
                    delivered += 1;
                }
                Some(Err(fault)) => {
                    faults += 1;
                    pipeline.on_delivery_error(fault).await;
                }
                None => {
                    log_warn!("motion stream closed by sensor after {delivered} samples");
                    pipeline
                        .on_delivery_error(SensorFault::new("motion stream ended"))
                        .await;
                    break;
                }
            }
        }
    }
}

/// Poll sensor availability between samples so silent disconnects surface.
pub async fn watchdog_loop<S: SessionStore>(
    pipeline: MotionPipeline<S>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                pipeline.check_sensor().await;
            }
            _ = cancel_token.cancelled() => {
                log_debug!("watchdog shutting down");
                break;
            }
        }
    }
}
