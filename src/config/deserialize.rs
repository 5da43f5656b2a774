// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Handles the target list and environment-resolved paths.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::path::PathBuf;

use super::env_value::EnvValue;
use super::target::{Target, TargetEntry};

pub fn deserialize_targets<'de, D>(deserializer: D) -> Result<NonEmpty<Target>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values: Vec<TargetEntry> = Vec::deserialize(deserializer)?;
    let targets = values
        .into_iter()
        .map(TargetEntry::into_target)
        .collect::<Result<Vec<_>, _>>()
        .map_err(serde::de::Error::custom)?;

    NonEmpty::from_vec(targets)
        .ok_or_else(|| serde::de::Error::custom("at least one target is required"))
}

pub fn deserialize_env_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = EnvValue::deserialize(deserializer)?;
    value.resolve_path().map_err(serde::de::Error::custom)
}

pub fn deserialize_env_path_option<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<EnvValue> = Option::deserialize(deserializer)?;
    opt.map(|value| value.resolve_path())
        .transpose()
        .map_err(serde::de::Error::custom)
}
