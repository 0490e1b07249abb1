pub mod orientation;
pub mod session;

pub use orientation::{FilteredOrientation, OrientationSample};
pub use session::{PostureSession, SessionHistoryStats, SessionTracker};
