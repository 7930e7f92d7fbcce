//! Process-wide tracing setup.

pub mod tracing;

pub use tracing::LogFormat;

/// Initialize tracing from `RUST_LOG` and `LOG_FORMAT`.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|v| LogFormat::parse(&v))
        .unwrap_or_default();
    tracing::init(format);
}
