//! Logging configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Logging sink parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    #[validate(custom(function = validation::validate_log_level))]
    pub level: String,

    /// Optional file that receives a copy of every log line.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
        }
    }
}
