//! Process-wide tracing/logging setup shared by every keel service.

/// Initialize process-wide logging from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with(tracing::LogConfig::from_env());
}

/// Subscriber configuration (format, filters).
pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat, init_with};
