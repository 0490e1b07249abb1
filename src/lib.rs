//! Motion-to-posture pipeline for a headset posture coach.
//!
//! Raw orientation samples are smoothed ([`motion::filter`]), classified into
//! good/warning/alert ([`motion::classifier`]) and tallied into session
//! statistics ([`motion::accumulator`]). [`pipeline::MotionPipeline`] wires
//! these to a [`sensing::MotionSensor`], publishes snapshots for rendering and
//! hands closed sessions to a [`store::SessionStore`].

pub mod db;
pub mod error;
pub mod models;
pub mod motion;
pub mod pipeline;
pub mod sensing;
pub mod settings;
pub mod store;
pub mod utils;

pub use db::Database;
pub use error::PipelineError;
pub use models::{OrientationSample, PostureSession, SessionHistoryStats};
pub use motion::PostureState;
pub use pipeline::{ConnectivityState, MotionPipeline, PipelineEvent, PipelineSnapshot};
pub use sensing::{MotionSensor, SensorFault, SimulatedSensor};
pub use settings::{PipelineSettings, SettingsStore};
pub use store::{MemorySessionStore, SessionStore};
pub use utils::init_logging;
