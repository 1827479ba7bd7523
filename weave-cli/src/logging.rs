//! Logging initialization: logs go only to a file (or are dropped), never to
//! the console, so stdout stays clean for command output.
//!
//! Reads `RUST_LOG` (level) and `LOG_FILE` (path) from env (e.g. via `.env`
//! loaded by `weave_config::load_and_apply`).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::log_format::TextWithSpanIds;

/// Initializes tracing. When `LOG_FILE` is set, logs append to that file
/// (plain text); otherwise logs are dropped.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hyper_util=off"));

    if let Ok(path) = std::env::var("LOG_FILE") {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let layer = tracing_subscriber::fmt::layer().event_format(TextWithSpanIds::new()).with_writer(std::sync::Mutex::new(file)).with_ansi(false).with_filter(filter);
        tracing_subscriber::registry().with(layer).init();
        tracing::info!(path = %path, "weave-cli logging to file");
    } else {
        let layer = tracing_subscriber::fmt::layer().with_writer(std::io::sink).with_filter(filter);
        tracing_subscriber::registry().with(layer).init();
    }
    Ok(())
}
