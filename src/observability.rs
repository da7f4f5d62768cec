//! Logging infrastructure for hypercell.
//!
//! hypercell uses `tracing` for structured logging. All events use target
//! "hypercell" and include an `event` field for filtering.
//!
//! ## Library Integration
//!
//! hypercell never initializes a global subscriber. Applications configure
//! tracing via `tracing_subscriber` or similar.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: module/subsystem (e.g., "retry", "mutator", "thrift")
//! - Use `%` for Display, `?` for Debug formatting
//! - Row keys and cell values are never logged

/// Target for all hypercell log events.
pub(crate) const HYPERCELL_TARGET: &str = "hypercell";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "connection",
///     event = "table_dropped",
///     table = %name,
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::HYPERCELL_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::HYPERCELL_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::HYPERCELL_TARGET, $($field)*)
    };
}

/// Macro for error-level log events.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::HYPERCELL_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
