//! Shared logging setup for the docket binaries.

/// Initialize process-wide tracing with the default `info` filter.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_FILTER);
}

/// Like `init`, with a caller-chosen fallback filter (used when `RUST_LOG`
/// is unset or invalid).
pub fn init_with_default(default_filter: &str) {
    tracing::init(default_filter);
}

/// Subscriber configuration (filters, formatting).
pub mod tracing;
