// ABOUTME: Configuration types and parsing for labexec.yml.
// ABOUTME: Handles YAML parsing, env var interpolation, and target validation.

mod deserialize;
mod env_value;
mod policy;
mod target;

pub use env_value::EnvValue;
pub use policy::{AuditConfig, BackoffConfig, ExecutionPolicy};
pub use target::Target;

use crate::error::{Error, Result};
use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use deserialize::deserialize_targets;

pub const CONFIG_FILENAME: &str = "labexec.yml";
pub const CONFIG_FILENAME_ALT: &str = "labexec.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".labexec/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_targets")]
    pub targets: NonEmpty<Target>,

    pub execution: ExecutionPolicy,

    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    pub fn new(targets: NonEmpty<Target>, execution: ExecutionPolicy) -> Result<Self> {
        let config = Config {
            targets,
            execution,
            audit: AuditConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.id.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate target id: {}",
                    target.id
                )));
            }
            if target.port == 0 {
                return Err(Error::InvalidConfig(format!(
                    "target {} has invalid port 0",
                    target.id
                )));
            }
            if target.user.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "target {} has an empty user",
                    target.id
                )));
            }
        }

        if let Some(allowed) = &self.execution.allowed_target_ids {
            for id in allowed {
                if !seen.contains(id.as_str()) {
                    return Err(Error::InvalidConfig(format!(
                        "allowed_target_ids names unknown target: {}",
                        id
                    )));
                }
            }
        }

        if self.execution.default_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "default_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
