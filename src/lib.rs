pub mod client;
pub mod config;
pub mod error;
pub mod execution;
pub mod generation;
pub mod log;
pub mod results;
pub mod state;
pub mod supervisor;
pub mod tasks;

use tracing_subscriber::EnvFilter;

/// Install the diagnostics subscriber. `RUST_LOG` overrides the default `warn`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
