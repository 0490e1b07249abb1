use anyhow::Result;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::OrientationSample;

/// Error payload delivered in place of a sample.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct SensorFault {
    pub message: String,
}

impl SensorFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type SensorReading = std::result::Result<OrientationSample, SensorFault>;

/// Headset motion source.
///
/// `subscribe` hands back the receiving end of the sample stream; dropping it
/// or calling `unsubscribe` ends delivery. Implementations must tolerate
/// `unsubscribe` without a prior subscription.
pub trait MotionSensor: Send + Sync + 'static {
    fn is_available(&self) -> bool;

    fn subscribe(&self) -> Result<mpsc::Receiver<SensorReading>>;

    fn unsubscribe(&self);
}
