pub mod controller;
pub mod state;

pub use controller::MotionPipeline;
pub use state::{
    ConnectivityEvent, ConnectivityState, PipelineCore, PipelineEvent, PipelineSnapshot,
};
