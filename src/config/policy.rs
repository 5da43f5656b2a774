// ABOUTME: Execution policy block: timeouts, retry, key storage, host keys.
// ABOUTME: Read-only after load and shared by every operation.

use crate::checksum::DigestAlgorithm;
use crate::types::TargetId;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::deserialize::{deserialize_env_path, deserialize_env_path_option};

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionPolicy {
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub default_timeout: Duration,

    #[serde(default = "default_retry")]
    pub default_retry: u32,

    #[serde(deserialize_with = "deserialize_env_path")]
    pub key_storage_path: PathBuf,

    #[serde(default)]
    pub checksum_algorithm: DigestAlgorithm,

    /// Explicit allow-list. When set, only these ids may be resolved even if
    /// other targets are configured and enabled.
    #[serde(default)]
    pub allowed_target_ids: Option<Vec<TargetId>>,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default, deserialize_with = "deserialize_env_path_option")]
    pub known_hosts_path: Option<PathBuf>,

    /// Accept and record the key of a host that has never been seen.
    /// A host whose recorded key changed is rejected regardless.
    #[serde(default)]
    pub trust_first_connection: bool,

    /// Remote directory that uploaded scripts are placed in.
    #[serde(default = "default_script_dir")]
    pub script_dir: String,
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_retry() -> u32 {
    3
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_script_dir() -> String {
    "/tmp/labexec".to_string()
}

impl ExecutionPolicy {
    pub fn new(key_storage_path: impl Into<PathBuf>) -> Self {
        Self {
            default_timeout: default_timeout(),
            default_retry: default_retry(),
            key_storage_path: key_storage_path.into(),
            checksum_algorithm: DigestAlgorithm::default(),
            allowed_target_ids: None,
            connect_timeout: default_connect_timeout(),
            backoff: BackoffConfig::default(),
            known_hosts_path: None,
            trust_first_connection: false,
            script_dir: default_script_dir(),
        }
    }
}

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_initial", with = "humantime_serde")]
    pub initial: Duration,

    #[serde(default = "default_max", with = "humantime_serde")]
    pub max: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

fn default_initial() -> Duration {
    Duration::from_millis(500)
}

fn default_max() -> Duration {
    Duration::from_secs(8)
}

fn default_multiplier() -> u32 {
    2
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial: default_initial(),
            max: default_max(),
            multiplier: default_multiplier(),
        }
    }
}

/// Where audit records go and who they are attributed to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    #[serde(default, deserialize_with = "deserialize_env_path_option")]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub actor: Option<String>,
}
