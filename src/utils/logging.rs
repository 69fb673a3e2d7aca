//! Gated logging macros used across the tracker.
//!
//! Each module that logs defines two constants next to its imports:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TARGET: &str = "formtrace::commit";
//! ```
//! and then calls the macros exported at the crate root. Turning `ENABLE_LOGS`
//! off silences one noisy module without touching the global `RUST_LOG` filter.

/// Info-level record routed to the calling module's `LOG_TARGET`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!(target: LOG_TARGET, $($arg)*);
        }
    };
}

/// Warn-level record routed to the calling module's `LOG_TARGET`.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!(target: LOG_TARGET, $($arg)*);
        }
    };
}

/// Error-level record routed to the calling module's `LOG_TARGET`.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!(target: LOG_TARGET, $($arg)*);
        }
    };
}

/// Debug-level record; used for per-poll chatter that is off by default.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!(target: LOG_TARGET, $($arg)*);
        }
    };
}

/// Installs `env_logger` once. `FORMTRACE_DEBUG=1` lowers the default filter to
/// `debug`; an explicit `RUST_LOG` always wins.
pub fn init_logging() {
    let debug_mode = std::env::var("FORMTRACE_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let default_filter = if debug_mode { "debug" } else { "info" };

    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .format_timestamp_millis()
    .try_init();
}
