// ABOUTME: Append-only audit trail: one record per operation, whatever the outcome.
// ABOUTME: Records carry who/what/where/when/result and never any key material.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::executor::ErrorKind;

/// Base directory for labexec state files (XDG Base Directory compliant).
const STATE_DIR: &str = ".local/state/labexec";
const AUDIT_FILENAME: &str = "audit.jsonl";
const ACTOR_ENV: &str = "LABEXEC_ACTOR";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to write audit record to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read audit log {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed audit record on line {line}: {source}")]
    Malformed {
        line: usize,
        source: serde_json::Error,
    },

    #[error("failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("audit writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Command,
    Script,
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Succeeded,
    Failed,
    TimedOut,
    Rejected,
}

/// One finished operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub actor: String,
    /// The id as the caller supplied it, which may not name a real target.
    pub target_id: String,
    pub operation: OperationKind,
    /// Program name for commands, script path for scripts, remote path for transfers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Connection attempts made; zero for rejections.
    pub attempts: u32,
}

/// Destination for audit records. Implementations must tolerate concurrent calls.
///
/// `record` may block on file I/O; async callers go through [`record_blocking`].
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Hand `record` to `sink` on tokio's blocking pool.
pub async fn record_blocking(sink: Arc<dyn AuditSink>, record: AuditRecord) -> Result<(), AuditError> {
    tokio::task::spawn_blocking(move || sink.record(&record)).await?
}

/// JSON-lines file. Each record is a single append-mode write.
#[derive(Debug, Clone)]
pub struct JsonlAuditLog {
    path: PathBuf,
}

impl JsonlAuditLog {
    /// Open (creating parent directories) an audit log at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| AuditError::Write {
                path: path.clone(),
                source,
            })?;
        }
        Ok(Self { path })
    }

    /// `$HOME/.local/state/labexec/audit.jsonl`, if HOME is set.
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(PathBuf::from(home).join(STATE_DIR).join(AUDIT_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back, oldest first.
    pub fn read_all(&self) -> Result<Vec<AuditRecord>, AuditError> {
        let read_err = |source| AuditError::Read {
            path: self.path.clone(),
            source,
        };
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_err(e)),
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(read_err)?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|source| AuditError::Malformed {
                line: idx + 1,
                source,
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let write_err = |source| AuditError::Write {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(write_err)?;
        file.write_all(&line).map_err(write_err)?;
        file.sync_data().map_err(write_err)
    }
}

/// In-memory trail, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Emits each record as a `tracing` event under the `labexec::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLog;

impl AuditSink for TracingAuditLog {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let elapsed_ms = (record.ended_at - record.started_at).num_milliseconds();
        tracing::info!(
            target: "labexec::audit",
            actor = %record.actor,
            target_id = %record.target_id,
            operation = ?record.operation,
            subject = record.subject.as_deref().unwrap_or("-"),
            status = ?record.status,
            error_kind = ?record.error_kind,
            attempts = record.attempts,
            elapsed_ms,
            "operation finished"
        );
        Ok(())
    }
}

/// Actor attributed to operations when none is configured:
/// `$LABEXEC_ACTOR`, else `$USER@<hostname>`.
pub fn current_actor() -> String {
    if let Ok(actor) = std::env::var(ACTOR_ENV)
        && !actor.trim().is_empty()
    {
        return actor;
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    format!("{user}@{host}")
}
