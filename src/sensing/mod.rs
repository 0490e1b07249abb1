pub mod controller;
pub mod loop_worker;
pub mod simulated;
pub mod source;

pub use controller::SensingController;
pub use simulated::SimulatedSensor;
pub use source::{MotionSensor, SensorFault, SensorReading};
