// ABOUTME: Remote machine entries from the `targets` configuration list.
// ABOUTME: Accepts `{id, host, port, user}` or the compact `{id, address: user@host:port}`.

use crate::types::TargetId;
use serde::{Deserialize, Serialize};

/// One remote machine managed by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_port() -> u16 {
    22
}

fn default_enabled() -> bool {
    true
}

impl Target {
    pub fn new(id: TargetId, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            port: default_port(),
            user: user.into(),
            enabled: true,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build a target from an address of the form `user@host[:port]`.
    pub fn from_address(id: TargetId, address: &str) -> Result<Self, String> {
        let address = address.trim();
        if address.is_empty() {
            return Err("target address cannot be empty".to_string());
        }

        let Some((user, rest)) = address.split_once('@') else {
            return Err(format!("target address '{}' must include a user", address));
        };
        if user.is_empty() {
            return Err("user cannot be empty".to_string());
        }

        let (host, port) = if let Some(colon_pos) = rest.rfind(':') {
            let port_str = &rest[colon_pos + 1..];
            let port = port_str
                .parse::<u16>()
                .map_err(|_| format!("invalid port: {}", port_str))?;
            (&rest[..colon_pos], port)
        } else {
            (rest, default_port())
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        Ok(Target::new(id, host, user).port(port))
    }

    /// Address in `user@host:port` form, for log lines.
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TargetEntry {
    Compact {
        id: TargetId,
        address: String,
        #[serde(default = "default_enabled")]
        enabled: bool,
    },
    Detailed(Target),
}

impl TargetEntry {
    pub(crate) fn into_target(self) -> Result<Target, String> {
        match self {
            TargetEntry::Compact {
                id,
                address,
                enabled,
            } => Target::from_address(id, &address).map(|t| t.enabled(enabled)),
            TargetEntry::Detailed(target) => Ok(target),
        }
    }
}
