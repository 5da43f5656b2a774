// ABOUTME: Remote executor façade: allow-list, key lookup, SSH, checksums and audit.
// ABOUTME: Every call concludes with exactly one audit record, whatever the outcome.

mod blocking;
mod error;
mod operation;
mod result;
mod retry;
mod state;

pub use blocking::BlockingExecutor;
pub use error::{ErrorKind, ExecError};
pub use operation::{Operation, TransitionResult};
pub use result::{Action, ExecutionRequest, ExecutionResult, TransferDescriptor, TransferResult};
pub use retry::RetryPolicy;
pub use state::{Closed, Connected, Pending, Validated};

use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::audit::{
    AuditError, AuditSink, AuditStatus, JsonlAuditLog, OperationKind, current_actor,
    record_blocking,
};
use crate::checksum::{self, ChecksumError};
use crate::config::{Config, ExecutionPolicy};
use crate::keys::KeyResolver;
use crate::registry::TargetRegistry;
use crate::shell;
use crate::ssh;
use crate::transport::{Connector, SshConnector};
use crate::types::TargetId;

use error::{AuditSnafu, DigestSnafu, LocalIoSnafu};

/// Entry point for remote operations.
///
/// Cloning is cheap and clones share configuration, connector and audit sink.
/// Nothing mutable is shared between calls, so clones can run concurrently.
#[derive(Clone)]
pub struct RemoteExecutor {
    registry: Arc<TargetRegistry>,
    policy: Arc<ExecutionPolicy>,
    keys: KeyResolver,
    connector: Arc<dyn Connector>,
    audit: Arc<dyn AuditSink>,
    actor: Arc<str>,
}

impl std::fmt::Debug for RemoteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteExecutor")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

impl RemoteExecutor {
    /// Executor using russh and a JSON-lines audit log at `audit.path`
    /// (default `$HOME/.local/state/labexec/audit.jsonl`).
    pub fn new(config: &Config) -> Result<Self, AuditError> {
        let path = config
            .audit
            .path
            .clone()
            .or_else(JsonlAuditLog::default_path)
            .ok_or_else(|| AuditError::Write {
                path: PathBuf::from("audit.jsonl"),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "HOME is not set and no audit.path is configured",
                ),
            })?;
        let audit = JsonlAuditLog::new(path)?;
        let connector = SshConnector::from_policy(&config.execution);
        Ok(Self::with_parts(config, Arc::new(connector), Arc::new(audit)))
    }

    /// Executor with an explicit connector and audit sink.
    pub fn with_parts(
        config: &Config,
        connector: Arc<dyn Connector>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let actor = config.audit.actor.clone().unwrap_or_else(current_actor);
        Self {
            registry: Arc::new(TargetRegistry::from_config(config)),
            policy: Arc::new(config.execution.clone()),
            keys: KeyResolver::new(&config.execution.key_storage_path),
            connector,
            audit,
            actor: actor.into(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into().into();
        self
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Run a shell command. `None` falls back to the policy defaults.
    pub async fn execute_remote_command(
        &self,
        target_id: &str,
        command: &str,
        timeout: Option<Duration>,
        retries: Option<u32>,
    ) -> Result<ExecutionResult, ExecError> {
        let mut request = ExecutionRequest::command(target_id, command);
        request.timeout = timeout;
        request.max_retries = retries;
        self.execute(request).await
    }

    /// Run a script with `args`.
    ///
    /// With `upload_first`, `script_ref` is a local file that is uploaded into
    /// `script_dir` with the same checksum verification as `upload_file`, then
    /// made executable and run. Otherwise `script_ref` is a path on the target.
    pub async fn execute_remote_script<S: AsRef<str>>(
        &self,
        target_id: &str,
        script_ref: &str,
        args: &[S],
        upload_first: bool,
    ) -> Result<ExecutionResult, ExecError> {
        let args = args.iter().map(|a| a.as_ref().to_string());
        self.execute(ExecutionRequest::script(target_id, script_ref, args, upload_first))
            .await
    }

    /// Run a command on several targets concurrently, one session and one
    /// audit record each. Results are returned in input order.
    pub async fn execute_on_targets<S: AsRef<str>>(
        &self,
        target_ids: &[S],
        command: &str,
    ) -> Vec<Result<ExecutionResult, ExecError>> {
        let calls = target_ids
            .iter()
            .map(|id| self.execute_remote_command(id.as_ref(), command, None, None));
        futures::future::join_all(calls).await
    }

    /// Run a command on every target that currently passes the allow-list,
    /// ordered by id.
    pub async fn execute_on_all_targets(
        &self,
        command: &str,
    ) -> Vec<(TargetId, Result<ExecutionResult, ExecError>)> {
        let ids: Vec<TargetId> = self.registry.operable_ids().into_iter().cloned().collect();
        let names: Vec<&str> = ids.iter().map(TargetId::as_str).collect();
        let results = self.execute_on_targets(&names, command).await;
        ids.into_iter().zip(results).collect()
    }

    /// Run one `ExecutionRequest`.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        let timeout = request.timeout.unwrap_or(self.policy.default_timeout);
        let retry = self.retry_policy(request.max_retries);
        let (kind, subject) = match &request.action {
            Action::Command(command) => (OperationKind::Command, program_name(command)),
            Action::Script { script_ref, .. } => (OperationKind::Script, script_ref.clone()),
        };

        let op = match Operation::new(&request.target_id, kind, Some(subject)).validate(&self.registry) {
            Ok(op) => op,
            Err((op, e)) => return Err(self.settle_error(op, e).await),
        };

        let op = match op
            .connect(self.connector.as_ref(), &self.keys, &retry, self.connect_timeout(timeout))
            .await
        {
            Ok(op) => op,
            Err((op, e)) => return Err(self.settle_error(op, e).await),
        };

        let outcome = match &request.action {
            Action::Command(command) => self.run(&op, command.clone(), timeout).await,
            Action::Script {
                script_ref,
                args,
                upload_first,
            } => {
                self.run_script(&op, script_ref, args, *upload_first, timeout)
                    .await
            }
        };

        let op = op.close().await;
        match outcome {
            Ok(mut result) => {
                result.attempts = op.attempts();
                result.elapsed = op.elapsed();
                let status = if result.success {
                    AuditStatus::Succeeded
                } else {
                    AuditStatus::Failed
                };
                self.settle(op, status, None).await?;
                Ok(result)
            }
            Err(e) => Err(self.settle_error(op, e).await),
        }
    }

    /// Upload a local file and verify it by digest on both ends.
    pub async fn upload_file(
        &self,
        target_id: &str,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> Result<TransferResult, ExecError> {
        let local_path = local_path.as_ref();
        let timeout = self.policy.default_timeout;
        let op = Operation::new(target_id, OperationKind::Upload, Some(remote_path.to_string()));

        let op = match op.validate(&self.registry) {
            Ok(op) => op,
            Err((op, e)) => return Err(self.settle_error(op, e).await),
        };

        if let Err(source) = tokio::fs::metadata(local_path).await {
            let e = ExecError::LocalIo {
                path: local_path.to_path_buf(),
                source,
            };
            return Err(self.settle_error(op, e).await);
        }

        let op = match op
            .connect(
                self.connector.as_ref(),
                &self.keys,
                &self.retry_policy(None),
                self.connect_timeout(timeout),
            )
            .await
        {
            Ok(op) => op,
            Err((op, e)) => return Err(self.settle_error(op, e).await),
        };

        let outcome = self.push(&op, local_path, remote_path, timeout).await;
        self.finish_transfer(op, outcome).await
    }

    /// Download a remote file, verifying it against the digest taken on the
    /// target before the copy. The file only appears at `local_path` once
    /// verified.
    pub async fn download_file(
        &self,
        target_id: &str,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<TransferResult, ExecError> {
        let local_path = local_path.as_ref();
        let timeout = self.policy.default_timeout;
        let op = Operation::new(target_id, OperationKind::Download, Some(remote_path.to_string()));

        let op = match op.validate(&self.registry) {
            Ok(op) => op,
            Err((op, e)) => return Err(self.settle_error(op, e).await),
        };

        let op = match op
            .connect(
                self.connector.as_ref(),
                &self.keys,
                &self.retry_policy(None),
                self.connect_timeout(timeout),
            )
            .await
        {
            Ok(op) => op,
            Err((op, e)) => return Err(self.settle_error(op, e).await),
        };

        let outcome = self.pull(&op, remote_path, local_path, timeout).await;
        self.finish_transfer(op, outcome).await
    }

    fn retry_policy(&self, max_retries: Option<u32>) -> RetryPolicy {
        RetryPolicy::new(
            max_retries.unwrap_or(self.policy.default_retry),
            self.policy.backoff,
        )
    }

    fn connect_timeout(&self, timeout: Duration) -> Duration {
        self.policy.connect_timeout.min(timeout)
    }

    async fn run(
        &self,
        op: &Operation<Connected>,
        command: String,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError> {
        let target_id = op.target().id.clone();
        debug!(target_id = %target_id, ?timeout, "executing command");

        let output = op
            .session()
            .run(&command, timeout)
            .await
            .map_err(|e| ExecError::from_session(target_id.clone(), e))?;

        Ok(ExecutionResult {
            success: output.success(),
            target_id,
            command,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            elapsed: op.elapsed(),
            attempts: op.attempts(),
        })
    }

    async fn run_script(
        &self,
        op: &Operation<Connected>,
        script_ref: &str,
        args: &[String],
        upload_first: bool,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError> {
        if !upload_first {
            return self.run(op, invocation(script_ref, args), timeout).await;
        }

        let local = Path::new(script_ref);
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ExecError::LocalIo {
                path: local.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "script reference has no file name",
                ),
            })?;
        let dir = self.policy.script_dir.trim_end_matches('/');
        let remote = format!("{dir}/{file_name}");

        let prepared = self
            .run(op, format!("mkdir -p -- {}", shell::quote(dir)), timeout)
            .await?;
        if !prepared.success {
            return Err(ExecError::Transport {
                target_id: op.target().id.clone(),
                source: ssh::Error::CommandFailed(format!(
                    "could not create {dir}: {}",
                    prepared.stderr.trim()
                )),
            });
        }

        self.push(op, local, &remote, timeout).await?;

        let command = format!(
            "chmod 700 -- {} && {}",
            shell::quote(&remote),
            invocation(&remote, args)
        );
        self.run(op, command, timeout).await
    }

    /// Copy up, then compare the local digest with the one computed on the target.
    async fn push(
        &self,
        op: &Operation<Connected>,
        local_path: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<TransferResult, ExecError> {
        let target_id = op.target().id.clone();
        let algorithm = self.policy.checksum_algorithm;

        let local_digest = checksum::digest_file(local_path, algorithm)
            .await
            .context(DigestSnafu {
                target_id: target_id.clone(),
            })?;

        let bytes = op
            .session()
            .put(local_path, remote_path, timeout)
            .await
            .map_err(|e| ExecError::from_session(target_id.clone(), e))?;
        debug!(target_id = %target_id, bytes, "uploaded");

        let remote_digest = self.remote_digest(op, remote_path, timeout).await?;
        if remote_digest != local_digest {
            let cleanup = format!("rm -f -- {}", shell::quote(remote_path));
            if let Err(e) = op.session().run(&cleanup, timeout).await {
                warn!(target_id = %target_id, error = %e, "failed to remove unverified upload");
            }
            return Err(ExecError::ChecksumMismatch {
                target_id,
                path: remote_path.to_string(),
                expected: local_digest,
                actual: remote_digest,
            });
        }

        Ok(TransferResult {
            descriptor: TransferDescriptor {
                target_id,
                local_path: local_path.to_path_buf(),
                remote_path: remote_path.to_string(),
                digest_algorithm: algorithm,
                digest: local_digest,
            },
            bytes,
            elapsed: op.elapsed(),
        })
    }

    /// Digest on the target, copy down to a `.partial` file, verify, rename.
    async fn pull(
        &self,
        op: &Operation<Connected>,
        remote_path: &str,
        local_path: &Path,
        timeout: Duration,
    ) -> Result<TransferResult, ExecError> {
        let target_id = op.target().id.clone();
        let algorithm = self.policy.checksum_algorithm;

        let remote_digest = self.remote_digest(op, remote_path, timeout).await?;

        if let Some(parent) = local_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .context(LocalIoSnafu { path: parent })?;
        }

        let partial = partial_path(local_path);
        let copied = async {
            let bytes = op
                .session()
                .get(remote_path, &partial, timeout)
                .await
                .map_err(|e| ExecError::from_session(target_id.clone(), e))?;

            let local_digest = checksum::digest_file(&partial, algorithm)
                .await
                .context(DigestSnafu {
                    target_id: target_id.clone(),
                })?;
            if local_digest != remote_digest {
                return Err(ExecError::ChecksumMismatch {
                    target_id: target_id.clone(),
                    path: remote_path.to_string(),
                    expected: remote_digest.clone(),
                    actual: local_digest,
                });
            }

            tokio::fs::rename(&partial, local_path)
                .await
                .context(LocalIoSnafu { path: local_path })?;
            Ok::<u64, ExecError>(bytes)
        }
        .await;

        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&partial).await
                    && rm.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %partial.display(), error = %rm, "failed to remove partial download");
                }
                return Err(e);
            }
        };
        debug!(target_id = %target_id, bytes, "downloaded");

        Ok(TransferResult {
            descriptor: TransferDescriptor {
                target_id,
                local_path: local_path.to_path_buf(),
                remote_path: remote_path.to_string(),
                digest_algorithm: algorithm,
                digest: remote_digest,
            },
            bytes,
            elapsed: op.elapsed(),
        })
    }

    async fn remote_digest(
        &self,
        op: &Operation<Connected>,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<String, ExecError> {
        let target_id = op.target().id.clone();
        let algorithm = self.policy.checksum_algorithm;
        let output = op
            .session()
            .run(&algorithm.remote_command(remote_path), timeout)
            .await
            .map_err(|e| ExecError::from_session(target_id.clone(), e))?;

        if !output.success() {
            return Err(ExecError::Digest {
                target_id,
                source: ChecksumError::UnexpectedOutput(format!(
                    "{} exited with {}: {}",
                    algorithm.remote_command(remote_path),
                    output.exit_code,
                    output.stderr.trim()
                )),
            });
        }

        algorithm
            .parse_remote_output(&output.stdout)
            .context(DigestSnafu { target_id })
    }

    async fn finish_transfer(
        &self,
        op: Operation<Connected>,
        outcome: Result<TransferResult, ExecError>,
    ) -> Result<TransferResult, ExecError> {
        let op = op.close().await;
        match outcome {
            Ok(mut result) => {
                result.elapsed = op.elapsed();
                self.settle(op, AuditStatus::Succeeded, None).await?;
                Ok(result)
            }
            Err(e) => Err(self.settle_error(op, e).await),
        }
    }

    /// Write the audit record for a finished operation.
    async fn settle<S>(
        &self,
        op: Operation<S>,
        status: AuditStatus,
        error_kind: Option<ErrorKind>,
    ) -> Result<(), ExecError> {
        let elapsed = op.elapsed();
        let attempts = op.attempts();
        let record = op.conclude(&self.actor, status, error_kind);
        info!(
            target_id = %record.target_id,
            operation = ?record.operation,
            status = ?status,
            attempts,
            ?elapsed,
            "operation finished"
        );
        let target_id = record.target_id.clone();
        let operation = record.operation;
        if let Err(source) = record_blocking(Arc::clone(&self.audit), record).await {
            error!(
                target_id = %target_id,
                operation = ?operation,
                status = ?status,
                error_kind = ?error_kind,
                error = %source,
                "audit record could not be written"
            );
            return Err(source).context(AuditSnafu);
        }
        Ok(())
    }

    /// Audit a failure and hand the error back, unless the audit write itself fails.
    async fn settle_error<S>(&self, op: Operation<S>, err: ExecError) -> ExecError {
        warn!(target_id = %op.requested_id(), error = %err, "operation failed");
        match self.settle(op, err.audit_status(), Some(err.kind())).await {
            Ok(()) => err,
            Err(audit_err) => audit_err,
        }
    }
}

/// First word of a command line; arguments stay out of the audit trail.
fn program_name(command: &str) -> String {
    command
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Quoted command line running `path` with `args`.
fn invocation(path: &str, args: &[String]) -> String {
    shell::join(std::iter::once(path).chain(args.iter().map(String::as_str)))
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}
