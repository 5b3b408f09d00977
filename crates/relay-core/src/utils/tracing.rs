use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

const LOG_DIR_ENV: &str = "RELAY_LOG_DIR";
const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG`. Output goes to stderr unless
/// `RELAY_LOG_DIR` names a directory, in which case logs rotate daily there.
pub fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = match std::env::var(LOG_DIR_ENV).ok().filter(|v| !v.trim().is_empty()) {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::daily(dir, "relay.log");
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(appender)
                .with_ansi(false)
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    installed.map_err(|e| Error::Configuration(format!("Failed to install tracing: {e}")))
}
