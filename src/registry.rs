// ABOUTME: Allow-list gate between callers and the network.
// ABOUTME: Resolves target ids to connection parameters; pure lookup, no I/O.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::config::{Config, Target};
use crate::types::TargetId;

/// Why a target id was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not present in the configured target list.
    Unknown,
    /// Present but `enabled: false`.
    Disabled,
    /// Present and enabled but outside `allowed_target_ids`.
    NotAllowListed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::Unknown => "unknown target",
            RejectReason::Disabled => "target disabled",
            RejectReason::NotAllowListed => "target not in allow-list",
        };
        f.write_str(s)
    }
}

/// Read-only view of the configured fleet.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: HashMap<TargetId, Target>,
    allowed: Option<HashSet<TargetId>>,
}

impl TargetRegistry {
    pub fn new(targets: impl IntoIterator<Item = Target>, allowed: Option<Vec<TargetId>>) -> Self {
        Self {
            targets: targets.into_iter().map(|t| (t.id.clone(), t)).collect(),
            allowed: allowed.map(|ids| ids.into_iter().collect()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.targets.iter().cloned(),
            config.execution.allowed_target_ids.clone(),
        )
    }

    /// Look up an operable target.
    pub fn resolve(&self, target_id: &str) -> Result<&Target, RejectReason> {
        let target = self
            .targets
            .get(target_id)
            .ok_or(RejectReason::Unknown)?;

        if !target.enabled {
            return Err(RejectReason::Disabled);
        }

        if let Some(allowed) = &self.allowed
            && !allowed.contains(target_id)
        {
            return Err(RejectReason::NotAllowListed);
        }

        Ok(target)
    }

    /// Ids that currently pass `resolve`, sorted.
    pub fn operable_ids(&self) -> Vec<&TargetId> {
        let mut ids: Vec<_> = self
            .targets
            .keys()
            .filter(|id| self.resolve(id.as_str()).is_ok())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, enabled: bool) -> Target {
        Target::new(TargetId::new(id).unwrap(), format!("{id}.lab"), "lab").enabled(enabled)
    }

    fn registry(allowed: Option<&[&str]>) -> TargetRegistry {
        TargetRegistry::new(
            [
                target("ingest", true),
                target("storage", true),
                target("analysis", false),
            ],
            allowed.map(|ids| ids.iter().map(|i| TargetId::new(i).unwrap()).collect()),
        )
    }

    #[test]
    fn resolves_enabled_target() {
        let reg = registry(None);
        let t = reg.resolve("ingest").unwrap();
        assert_eq!(t.host, "ingest.lab");
        assert_eq!(t.port, 22);
    }

    #[test]
    fn unknown_target_is_rejected() {
        assert_eq!(registry(None).resolve("report"), Err(RejectReason::Unknown));
    }

    #[test]
    fn invalid_id_is_treated_as_unknown() {
        assert_eq!(registry(None).resolve("../../etc"), Err(RejectReason::Unknown));
    }

    #[test]
    fn disabled_target_is_rejected() {
        assert_eq!(registry(None).resolve("analysis"), Err(RejectReason::Disabled));
    }

    #[test]
    fn allow_list_override_narrows_fleet() {
        let reg = registry(Some(&["ingest"]));
        assert!(reg.resolve("ingest").is_ok());
        assert_eq!(reg.resolve("storage"), Err(RejectReason::NotAllowListed));
    }

    #[test]
    fn allow_list_does_not_revive_disabled_target() {
        let reg = registry(Some(&["analysis"]));
        assert_eq!(reg.resolve("analysis"), Err(RejectReason::Disabled));
    }

    #[test]
    fn operable_ids_are_sorted() {
        let reg = registry(None);
        let ids: Vec<_> = reg.operable_ids().iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, ["ingest", "storage"]);
    }
}
