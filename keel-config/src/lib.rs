//! # Keel Configuration System
//!
//! Hierarchical configuration for the Keel runtime: memory manager tracking
//! precision, check strictness, pool capacities and logging.
//!
//! ## Features
//! - **Unified Configuration**: Single source of truth across all components
//! - **Validation**: Runtime validation of capacities and log levels
//! - **Environment Awareness**: `KEEL_ENV` selects an override file

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod logging;
mod memory;
mod provider;
mod validation;

pub use error::ConfigError;
pub use logging::LoggingConfig;
pub use memory::{DiagnosticLevel, MemoryConfig, ReleaseTier};
pub use provider::{ConfigProvider, FileProvider, LayeredProvider};
pub use validation::CAPACITY_ALIGNMENT;

/// Top‑level configuration container for all Keel components.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct KeelConfig {
    /// Memory manager parameters.
    #[validate(nested)]
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Logging sink parameters.
    #[validate(nested)]
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KeelConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/keel.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<environment>.yaml` - Environment‑specific overrides (`KEEL_ENV`).
    /// 4. `KEEL_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(&LayeredProvider::from_env())
    }

    /// Load configuration from a specific path for testing/validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with(&FileProvider::new(path))
    }

    /// Extract and validate configuration from any provider.
    pub fn load_with<P: ConfigProvider>(provider: &P) -> Result<Self, ConfigError> {
        provider
            .load()?
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn full_config_validation() {
        let config = KeelConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn environment_override() {
        Jail::expect_with(|jail| {
            jail.set_env("KEEL_MEMORY__TEMPORARY_STACK_CAPACITY", "8192");
            jail.set_env("KEEL_MEMORY__RELEASE_TIER", "release");
            let config = KeelConfig::load().expect("config should load");
            assert_eq!(config.memory.temporary_stack_capacity, 8192);
            assert_eq!(config.memory.release_tier, ReleaseTier::Release);
            Ok(())
        });
    }

    #[test]
    fn environment_file_overrides_base() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/keel.yaml",
                "memory:\n  diagnostic_level: counts\nlogging:\n  level: debug\n",
            )?;
            jail.create_file("config/staging.yaml", "memory:\n  diagnostic_level: bytes\n")?;
            jail.set_env("KEEL_ENV", "staging");

            let config = KeelConfig::load().expect("config should load");
            assert_eq!(config.memory.diagnostic_level, DiagnosticLevel::Bytes);
            assert_eq!(config.logging.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn load_from_missing_path() {
        let err = KeelConfig::load_from_path("definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn invalid_values_are_reported_per_field() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bad.yaml",
                "memory:\n  permanent_capacity: 12\nlogging:\n  level: loud\n",
            )?;
            let err = KeelConfig::load_from_path("bad.yaml").unwrap_err();
            let message = err.to_string();
            assert!(message.contains("Invalid configuration"), "{message}");
            assert!(message.contains("memory.permanent_capacity"), "{message}");
            assert!(message.contains("logging.level"), "{message}");
            Ok(())
        });
    }
}
