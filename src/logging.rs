//! Structured logging initialisation.
//!
//! The filter level can be overridden at runtime via `RUST_LOG`. When a log
//! file is configured it is opened in append mode and written without ANSI
//! colours, one timestamped line per event.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

/// Initialise the global tracing subscriber.
///
/// Returns an error if the log file cannot be opened or a subscriber is
/// already installed.
pub fn init_logging(
    format: LogFormat,
    level: &str,
    file: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match (format, file) {
        (LogFormat::Human, None) => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()?,
        (LogFormat::Json, None) => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()?,
        (LogFormat::Human, Some(path)) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(
                    fmt::layer()
                        .with_ansi(false)
                        .with_target(true)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()?
        }
        (LogFormat::Json, Some(path)) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()?
        }
    }

    Ok(())
}
