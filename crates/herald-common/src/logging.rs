use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "HERALD_LOG";

/// Installs the global subscriber. `HERALD_LOG`, then `RUST_LOG`, override the configured level.
/// Diagnostics go to stderr so command output on stdout stays machine-readable.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
