//! Configuration provider trait for loading Keel configuration from various sources.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};

use crate::{ConfigError, KeelConfig};

/// Trait for loading Keel configuration from different sources.
pub trait ConfigProvider {
    /// Loads the configuration and returns a Figment instance.
    fn load(&self) -> Result<Figment, ConfigError>;
}

/// Layered provider: defaults, `config/keel.yaml`, `config/<env>.yaml`, then `KEEL_*` variables.
#[derive(Debug, Clone)]
pub struct LayeredProvider {
    pub base_dir: PathBuf,
    pub environment: String,
}

impl LayeredProvider {
    pub fn from_env() -> Self {
        Self {
            base_dir: PathBuf::from("config"),
            environment: std::env::var("KEEL_ENV").unwrap_or_else(|_| "production".into()),
        }
    }
}

impl ConfigProvider for LayeredProvider {
    fn load(&self) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(KeelConfig::default()));

        let base = self.base_dir.join("keel.yaml");
        if base.exists() {
            figment = figment.merge(Yaml::file(base));
        }

        let env_file = self.base_dir.join(format!("{}.yaml", self.environment));
        if env_file.exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Ok(figment.merge(Env::prefixed("KEEL_").split("__")))
    }
}

/// A single YAML file with `KEEL_*` overrides on top.
#[derive(Debug, Clone)]
pub struct FileProvider {
    pub path: PathBuf,
}

impl FileProvider {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConfigProvider for FileProvider {
    fn load(&self) -> Result<Figment, ConfigError> {
        if !self.path.exists() {
            return Err(ConfigError::FileNotFound(self.path.clone()));
        }

        Ok(Figment::from(Serialized::defaults(KeelConfig::default()))
            .merge(Yaml::file(&self.path))
            .merge(Env::prefixed("KEEL_").split("__")))
    }
}
