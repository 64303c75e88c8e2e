//! Tracing/logging setup shared by the client binaries.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize process-wide logging at `info` unless `RUST_LOG` says otherwise.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(format: LogFormat) {
    crate::tracing::init(format, "info");
}

/// Like [`init`], with a different fallback filter (e.g. `warn` for one-shot commands).
pub fn init_with_filter(format: LogFormat, default_filter: &str) {
    crate::tracing::init(format, default_filter);
}
