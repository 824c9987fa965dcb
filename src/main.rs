//! tcp-echo-pool: a TCP echo server with a fixed worker pool
//!
//! Every byte a client sends is written back unmodified and in order.
//!
//! Features:
//! - At most N connections are served at once; further clients wait in the
//!   listen backlog until a worker slot frees up
//! - Per-connection read/write timeouts
//! - Thread-per-slot or tokio backends
//! - Configuration via CLI arguments or TOML file

mod config;
mod runtime;

use config::{Config, RuntimeType};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        backlog = config.backlog,
        runtime = ?config.runtime,
        workers = config.workers,
        buffer_size = config.buffer_size,
        read_timeout_secs = config.read_timeout.as_secs(),
        write_timeout_secs = config.write_timeout.as_secs(),
        "Starting TCP echo server"
    );

    match config.runtime {
        RuntimeType::Threads => info!("Using thread-per-slot runtime"),
        RuntimeType::Tokio => info!("Using tokio runtime"),
    }

    runtime::run(&config)?;
    Ok(())
}
