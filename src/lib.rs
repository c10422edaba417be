pub mod agent;
pub mod llm;
pub mod models;
pub mod services;
pub mod session;
pub mod tools;
pub mod utils;

use tracing_subscriber::EnvFilter;

/// Initialize the diagnostics stream (stderr).
///
/// Per-job conversation logs are separate; see [`session::SessionLogger`].
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
