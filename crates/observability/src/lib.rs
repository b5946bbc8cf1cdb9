//! Process-wide logging setup shared by every binary.

/// Tracing configuration (filters, JSON formatting).
pub mod tracing;

/// Initialize tracing for the process.
///
/// Safe to call multiple times; later calls leave the first subscriber in place.
pub fn init() {
    let _ = tracing::init();
}
