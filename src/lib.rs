//! Root workspace crate. Carries no runtime logic of its own — every
//! component lives in `tasker-shared`, `tasker-stores`,
//! `tasker-orchestration`, or `tasker-worker` — and exists so the
//! end-to-end tests under `tests/` can depend on all four without any of
//! them depending on each other circularly.

use tracing_subscriber::EnvFilter;

/// Initializes a `tracing` subscriber from `RUST_LOG` (falling back to
/// `info`), writing to stderr. Safe to call more than once; later calls
/// are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();
}
