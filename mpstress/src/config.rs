//! Collector configuration
//!
//! Handles:
//! - Remote user and mpstat interval
//! - Output directory for the time series
//! - Helper program and remote command
//! - Optional TOML file, overridden by command-line flags

use crate::error::CollectorError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub user: String,
    pub interval: u32,
    pub output_dir: PathBuf,
    pub helper: HelperConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Remote execution tool fanning the command out to every host
    pub program: String,
    /// Sampling command run on each host, followed by the interval
    pub remote_command: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            interval: 1,
            output_dir: PathBuf::from("output"),
            helper: HelperConfig::default(),
        }
    }
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: "orgalorg".to_string(),
            remote_command: "mpstat".to_string(),
        }
    }
}

/// Values given on the command line; `None` keeps the file/default value
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub user: Option<String>,
    pub interval: Option<u32>,
    pub output_dir: Option<PathBuf>,
    pub helper_program: Option<String>,
}

impl CollectorConfig {
    /// Load from `path`, or from the default location if it exists, or defaults
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::config_file_path().filter(|p| p.exists()),
        };

        match path {
            Some(path) => {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Invalid config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `<config dir>/mpstress/config.toml`
    pub fn config_file_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("mpstress");
        path.push("config.toml");
        Some(path)
    }

    pub fn apply(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(user) = overrides.user {
            self.user = user;
        }
        if let Some(interval) = overrides.interval {
            self.interval = interval;
        }
        if let Some(output_dir) = overrides.output_dir {
            self.output_dir = output_dir;
        }
        if let Some(program) = overrides.helper_program {
            self.helper.program = program;
        }
        self
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.user.trim().is_empty() {
            return Err(CollectorError::Config("user cannot be empty".into()));
        }
        if self.interval == 0 {
            return Err(CollectorError::Config("interval must be at least 1 second".into()));
        }
        if self.helper.program.trim().is_empty() {
            return Err(CollectorError::Config("helper program cannot be empty".into()));
        }
        if self.helper.remote_command.trim().is_empty() {
            return Err(CollectorError::Config("remote command cannot be empty".into()));
        }
        Ok(())
    }
}
