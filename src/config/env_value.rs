// ABOUTME: Configuration values that may be read from the environment.
// ABOUTME: Lets key and known_hosts locations differ per deployment without editing YAML.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl EnvValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            EnvValue::Literal(s) => Ok(s.clone()),
            EnvValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default
                    .clone()
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
        }
    }

    pub fn resolve_path(&self) -> Result<PathBuf> {
        let value = self.resolve()?;
        if value.trim().is_empty() {
            return Err(Error::InvalidConfig("path value cannot be empty".to_string()));
        }
        Ok(PathBuf::from(value))
    }
}
