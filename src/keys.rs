// ABOUTME: Resolves a target id to its private key file under the key store.
// ABOUTME: Resolution runs per operation so rotated keys apply on the next call.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::types::TargetId;

/// Key errors. Messages name the target, never the key path.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no private key found for target {0}")]
    NotFound(TargetId),

    #[error("private key for target {0} is readable by group or others (should be 600)")]
    InsecurePermissions(TargetId),

    #[error("failed to inspect private key for target {target}: {source}")]
    Io {
        target: TargetId,
        source: std::io::Error,
    },
}

/// A resolved private key location. Holds no key material.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyReference {
    target_id: TargetId,
    path: PathBuf,
}

impl KeyReference {
    pub fn new(target_id: TargetId, path: impl Into<PathBuf>) -> Self {
        Self {
            target_id,
            path: path.into(),
        }
    }

    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name only, safe to show in diagnostics.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Debug for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyReference")
            .field("target_id", &self.target_id)
            .field("file", &self.file_name())
            .finish()
    }
}

/// Looks up per-target keys under a base directory.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    base_dir: PathBuf,
}

impl KeyResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Candidate locations in lookup order.
    fn candidates(&self, target_id: &TargetId) -> [PathBuf; 6] {
        let id = target_id.as_str();
        let dir = self.base_dir.join(id);
        [
            dir.join("id_ed25519"),
            dir.join("id_ecdsa"),
            dir.join("id_rsa"),
            self.base_dir.join(format!("{id}_ed25519")),
            self.base_dir.join(format!("{id}.key")),
            self.base_dir.join(id),
        ]
    }

    pub fn resolve_key(&self, target_id: &TargetId) -> Result<KeyReference, KeyError> {
        for candidate in self.candidates(target_id) {
            // metadata() follows symlinks, so `current -> key-2024q3` style rotation works.
            match std::fs::metadata(&candidate) {
                Ok(meta) if meta.is_file() => {
                    validate_key_permissions(target_id, &meta)?;
                    debug!(target_id = %target_id, "resolved private key");
                    return Ok(KeyReference::new(target_id.clone(), candidate));
                }
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(KeyError::Io {
                        target: target_id.clone(),
                        source,
                    });
                }
            }
        }

        Err(KeyError::NotFound(target_id.clone()))
    }

    /// [`resolve_key`](Self::resolve_key) on the blocking pool, so the
    /// filesystem lookups never stall a runtime worker.
    pub async fn resolve_key_async(&self, target_id: &TargetId) -> Result<KeyReference, KeyError> {
        let resolver = self.clone();
        let id = target_id.clone();
        tokio::task::spawn_blocking(move || resolver.resolve_key(&id))
            .await
            .unwrap_or_else(|e| {
                Err(KeyError::Io {
                    target: target_id.clone(),
                    source: std::io::Error::other(e),
                })
            })
    }
}

#[cfg(unix)]
fn validate_key_permissions(target_id: &TargetId, meta: &std::fs::Metadata) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    if meta.permissions().mode() & 0o077 != 0 {
        return Err(KeyError::InsecurePermissions(target_id.clone()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn validate_key_permissions(_target_id: &TargetId, _meta: &std::fs::Metadata) -> Result<(), KeyError> {
    Ok(())
}
