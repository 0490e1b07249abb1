//! Module-gated logging macros.
//!
//! Each module that logs through these macros declares its own switch:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("pipeline started");
//! ```
//! Flipping the const to `false` silences the module without touching the
//! global `RUST_LOG` filter.

use log::LevelFilter;

/// Environment switch that drops the default filter to `debug`.
pub const DEBUG_ENV_VAR: &str = "POSTURE_COACH_DEBUG";

pub fn debug_mode_enabled() -> bool {
    std::env::var(DEBUG_ENV_VAR)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Initialize `env_logger`. `RUST_LOG` still takes precedence per module.
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let level = if debug_mode_enabled() {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
