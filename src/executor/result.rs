// ABOUTME: Requests and results exchanged with the executor façade.
// ABOUTME: Results are only constructed for operations that ran to completion.

use std::path::PathBuf;
use std::time::Duration;

use crate::checksum::DigestAlgorithm;
use crate::types::TargetId;

/// What an `ExecutionRequest` runs on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A shell command line, passed through unchanged.
    Command(String),
    /// A script: a local file when `upload_first`, otherwise a path already
    /// present on the target.
    Script {
        script_ref: String,
        args: Vec<String>,
        upload_first: bool,
    },
}

/// One logical operation. `None` fields fall back to the execution policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub target_id: String,
    pub action: Action,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl ExecutionRequest {
    pub fn command(target_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            action: Action::Command(command.into()),
            timeout: None,
            max_retries: None,
        }
    }

    pub fn script<I, S>(
        target_id: impl Into<String>,
        script_ref: impl Into<String>,
        args: I,
        upload_first: bool,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target_id: target_id.into(),
            action: Action::Script {
                script_ref: script_ref.into(),
                args: args.into_iter().map(Into::into).collect(),
                upload_first,
            },
            timeout: None,
            max_retries: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// Outcome of a command or script that ran to an exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub target_id: TargetId,
    /// The command line as sent to the target.
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: u32,
    pub elapsed: Duration,
    /// True only when `exit_code` is 0.
    pub success: bool,
    /// Connection attempts used, including the successful one.
    pub attempts: u32,
}

/// One verified file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub target_id: TargetId,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub digest_algorithm: DigestAlgorithm,
    /// Hex digest both endpoints agreed on.
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub descriptor: TransferDescriptor,
    pub bytes: u64,
    pub elapsed: Duration,
}
