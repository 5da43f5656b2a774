// ABOUTME: Executor error taxonomy with SNAFU pattern.
// ABOUTME: Retry and audit decisions branch on ErrorKind, never on message text.

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::path::PathBuf;
use std::time::Duration;

use crate::audit::{AuditError, AuditStatus};
use crate::checksum::ChecksumError;
use crate::keys::KeyError;
use crate::registry::RejectReason;
use crate::ssh;
use crate::types::TargetId;

/// Failure of one executor operation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExecError {
    #[snafu(display("target '{target_id}' not allowed: {reason}"))]
    TargetNotAllowed {
        target_id: String,
        reason: RejectReason,
    },

    #[snafu(display("{source}"))]
    KeyNotFound { source: KeyError },

    #[snafu(display("could not connect to {target_id} after {attempts} attempt(s): {source}"))]
    SshConnection {
        target_id: TargetId,
        attempts: u32,
        source: ssh::Error,
    },

    #[snafu(display("host key verification failed for {target_id}: {source}"))]
    HostKeyMismatch {
        target_id: TargetId,
        source: ssh::Error,
    },

    #[snafu(display("refusing unknown host for {target_id}: {source}"))]
    UnknownHostKey {
        target_id: TargetId,
        source: ssh::Error,
    },

    #[snafu(display("authentication to {target_id} failed: {source}"))]
    Authentication {
        target_id: TargetId,
        source: ssh::Error,
    },

    #[snafu(display("operation on {target_id} exceeded {timeout:?}"))]
    CommandTimeout {
        target_id: TargetId,
        timeout: Duration,
    },

    #[snafu(display(
        "checksum mismatch for {path} on {target_id}: expected {expected}, got {actual}"
    ))]
    ChecksumMismatch {
        target_id: TargetId,
        path: String,
        expected: String,
        actual: String,
    },

    #[snafu(display("digest computation failed on {target_id}: {source}"))]
    Digest {
        target_id: TargetId,
        source: ChecksumError,
    },

    #[snafu(display("transport error on {target_id}: {source}"))]
    Transport {
        target_id: TargetId,
        source: ssh::Error,
    },

    #[snafu(display("local file error for {}: {source}", path.display()))]
    LocalIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("audit trail write failed: {source}"))]
    Audit { source: AuditError },
}

/// Error kind for programmatic handling and the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TargetNotAllowed,
    KeyNotFound,
    SshConnection,
    HostKeyMismatch,
    UnknownHostKey,
    Authentication,
    CommandTimeout,
    ChecksumMismatch,
    Transport,
    LocalIo,
    Audit,
}

impl ExecError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::TargetNotAllowed { .. } => ErrorKind::TargetNotAllowed,
            ExecError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            ExecError::SshConnection { .. } => ErrorKind::SshConnection,
            ExecError::HostKeyMismatch { .. } => ErrorKind::HostKeyMismatch,
            ExecError::UnknownHostKey { .. } => ErrorKind::UnknownHostKey,
            ExecError::Authentication { .. } => ErrorKind::Authentication,
            ExecError::CommandTimeout { .. } => ErrorKind::CommandTimeout,
            ExecError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            ExecError::Digest { source, .. } => match source {
                ChecksumError::Read { .. } => ErrorKind::LocalIo,
                ChecksumError::Unsupported(_) | ChecksumError::UnexpectedOutput(_) => {
                    ErrorKind::Transport
                }
            },
            ExecError::Transport { .. } => ErrorKind::Transport,
            ExecError::LocalIo { .. } => ErrorKind::LocalIo,
            ExecError::Audit { .. } => ErrorKind::Audit,
        }
    }

    /// Only transient connection failures are retried.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::SshConnection
    }

    pub fn audit_status(&self) -> AuditStatus {
        match self.kind() {
            ErrorKind::TargetNotAllowed => AuditStatus::Rejected,
            ErrorKind::CommandTimeout => AuditStatus::TimedOut,
            _ => AuditStatus::Failed,
        }
    }

    /// Classify a failure raised while opening a session.
    pub(crate) fn from_connect(target_id: TargetId, attempts: u32, source: ssh::Error) -> Self {
        match source {
            source if source.is_transient() => ExecError::SshConnection {
                target_id,
                attempts,
                source,
            },
            ssh::Error::HostKeyMismatch { .. } => ExecError::HostKeyMismatch { target_id, source },
            ssh::Error::UnknownHostKey { .. } => ExecError::UnknownHostKey { target_id, source },
            ssh::Error::AuthenticationFailed
            | ssh::Error::KeyLoadFailed { .. }
            | ssh::Error::Key(_) => ExecError::Authentication { target_id, source },
            other => ExecError::from_session(target_id, other),
        }
    }

    /// Classify a failure raised on an open session.
    pub(crate) fn from_session(target_id: TargetId, source: ssh::Error) -> Self {
        match source {
            ssh::Error::CommandTimeout(timeout) => ExecError::CommandTimeout { target_id, timeout },
            source => ExecError::Transport { target_id, source },
        }
    }
}
