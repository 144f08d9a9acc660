//! Logging setup for applications and benchmarks built on fgraph-solver.
//!
//! The library itself only emits `tracing` events; nothing is printed unless
//! the caller installs a subscriber, for example with [`init_logger`].

use tracing::Level;

/// Initialize the tracing subscriber with the default INFO level.
///
/// The level can be overridden with `RUST_LOG`:
/// ```bash
/// RUST_LOG=debug cargo bench
/// RUST_LOG=fgraph_solver::optimizer=debug cargo test
/// ```
///
/// # Example
/// ```no_run
/// use fgraph_solver::init_logger;
///
/// init_logger();
/// tracing::info!("Application started");
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level.
///
/// Only the first call installs a subscriber; later calls are no-ops.
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_initialization_is_harmless() {
        init_logger_with_level(Level::DEBUG);
        init_logger();
        tracing::debug!("logger initialized twice");
    }
}
