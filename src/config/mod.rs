//! Configuration management for the datasync engine.
//!
//! Provides hierarchical configuration loading with priority:
//! 1. Default values (hardcoded)
//! 2. Optional caller-provided config file
//! 3. Local overrides (`config/local.toml`)
//! 4. Environment variables (highest priority, `KVSYNC__` prefix)

mod retry;
mod sync;

pub use retry::*;
pub use sync::*;

use std::env;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Watch / resync channel and key-space parameters
    #[serde(default)]
    pub sync: SyncConfig,

    /// Retry policies for store-facing operations
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl Settings {
    /// Load configuration from multiple sources with priority:
    /// 1. Caller-provided config file
    /// 2. Local overrides
    /// 3. Environment variables
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a TOML config file
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        } else if let Ok(path) = env::var("KVSYNC_CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&path).required(true));
        }

        builder = builder.add_source(File::with_name("config/local").required(false));

        // Environment variables (highest priority)
        builder = builder.add_source(
            Environment::with_prefix("KVSYNC")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        builder.build()?.try_deserialize().map_err(Error::Config)
    }
}

#[cfg(test)]
mod config_test;
