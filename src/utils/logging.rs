//! Gated logging macros for background draft paths.
//!
//! Autosave and storage run off the UI path and can be noisy, so each
//! module that uses these macros declares two constants:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TARGET: &str = "cilt_drafts::store";
//!
//! use crate::{log_debug, log_warn};
//!
//! log_warn!("dropping save for {}", key);
//! ```
//!
//! Records are emitted through the `log` facade with `LOG_TARGET` as the
//! target, so `RUST_LOG=cilt_drafts::autosave=debug` narrows output to one module.

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!(target: LOG_TARGET, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!(target: LOG_TARGET, $($arg)*);
        }
    };
}

/// Storage failures are always worth seeing, but callers may still mute
/// them in tests that provoke failures on purpose.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!(target: LOG_TARGET, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!(target: LOG_TARGET, $($arg)*);
        }
    };
}
