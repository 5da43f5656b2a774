// ABOUTME: Validated logical identifier for a managed remote machine.
// ABOUTME: Ids are short, path-safe tokens so they can also name key files.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

const MAX_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetIdError {
    #[error("target id cannot be empty")]
    Empty,

    #[error("target id exceeds maximum length of 64 characters")]
    TooLong,

    #[error("target id cannot start with '.' or '-'")]
    InvalidStart,

    #[error("invalid character in target id: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(value: &str) -> Result<Self, TargetIdError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TargetIdError::Empty);
        }

        if value.len() > MAX_LEN {
            return Err(TargetIdError::TooLong);
        }

        // Leading dots would allow `..` to escape the key directory.
        if value.starts_with('.') || value.starts_with('-') {
            return Err(TargetIdError::InvalidStart);
        }

        for c in value.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
                return Err(TargetIdError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for TargetId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for TargetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TargetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        TargetId::new(&value).map_err(serde::de::Error::custom)
    }
}
