use thiserror::Error;

/// Failures the pipeline reports to its owner.
///
/// Only `start()` returns these directly. The rest are turned into a status
/// line, a connectivity change, or a [`PipelineEvent`](crate::pipeline::PipelineEvent).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// The sensor has no motion capability right now.
    #[error("Device motion not available")]
    SensorUnavailable,

    /// The sensor delivered an error instead of a sample.
    #[error("Motion update error: {0}")]
    SensorDelivery(String),

    /// A closed session could not be handed to the store.
    #[error("Failed to save session: {0}")]
    PersistenceWrite(String),

    #[error("motion pipeline already running")]
    AlreadyRunning,
}
