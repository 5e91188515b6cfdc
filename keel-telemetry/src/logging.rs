//! ## keel-telemetry::logging
//! **Subscriber setup from `LoggingConfig`**
//!
//! ### Expectations:
//! - `RUST_LOG` overrides the configured level
//! - Optional plain-text copy of the log in a file
//! - Thread names on every line, since scope state is per thread

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use keel_config::LoggingConfig;
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter `{filter}`: {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("cannot open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("global subscriber already set")]
    AlreadySet(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber.
    pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
        Self::subscriber(config)?.try_init()?;
        Ok(())
    }

    /// Builds the subscriber without installing it.
    pub fn subscriber(
        config: &LoggingConfig,
    ) -> Result<impl Subscriber + Send + Sync + 'static, LoggingError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.level).map_err(|source| LoggingError::Filter {
                filter: config.level.clone(),
                source,
            })?,
        };

        let file_layer = match &config.file {
            Some(path) => Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_thread_names(true)
                    .with_writer(open_log_file(path)?),
            ),
            None => None,
        };

        Ok(Registry::default()
            .with(filter)
            .with(fmt::layer().with_thread_names(true))
            .with(file_layer))
    }
}

fn open_log_file(path: &Path) -> Result<Mutex<File>, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(Mutex::new)
        .map_err(|source| LoggingError::File {
            path: path.to_path_buf(),
            source,
        })
}
