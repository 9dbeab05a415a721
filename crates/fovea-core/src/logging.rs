//! Tracing setup shared by the binaries.

use tracing_subscriber::EnvFilter;

/// Initialise a `tracing_subscriber` using `FOVEA_LOG` first, then
/// `RUST_LOG`, then `info`.
///
/// Log field conventions for the engine: include `rank` on anything in the
/// distribution path, `gpu` on decode/evaluate events, and `worker` on
/// per-thread lifecycle events.
pub fn init_tracing() {
    // Logs go to stderr so machine-readable stdout (plan --json, probe
    // --json) stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("FOVEA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
