pub mod logging;

pub use logging::{debug_mode_enabled, init_logging};
