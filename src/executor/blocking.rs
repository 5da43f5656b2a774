// ABOUTME: Blocking wrapper for callers without an async runtime.
// ABOUTME: Owns a tokio runtime and drives one executor call at a time per thread.

use std::path::Path;
use std::time::Duration;

use super::{ExecError, ExecutionRequest, ExecutionResult, RemoteExecutor, TransferResult};

/// Synchronous front for [`RemoteExecutor`].
///
/// Each method blocks the calling thread until the operation and its audit
/// record are done. Calling these from inside a tokio runtime panics, as with
/// any nested `block_on`.
#[derive(Debug)]
pub struct BlockingExecutor {
    inner: RemoteExecutor,
    runtime: tokio::runtime::Runtime,
}

impl BlockingExecutor {
    pub fn new(inner: RemoteExecutor) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("labexec")
            .build()?;
        Ok(Self { inner, runtime })
    }

    pub fn executor(&self) -> &RemoteExecutor {
        &self.inner
    }

    pub fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        self.runtime.block_on(self.inner.execute(request))
    }

    pub fn execute_remote_command(
        &self,
        target_id: &str,
        command: &str,
        timeout: Option<Duration>,
        retries: Option<u32>,
    ) -> Result<ExecutionResult, ExecError> {
        self.runtime.block_on(
            self.inner
                .execute_remote_command(target_id, command, timeout, retries),
        )
    }

    pub fn execute_remote_script<S: AsRef<str>>(
        &self,
        target_id: &str,
        script_ref: &str,
        args: &[S],
        upload_first: bool,
    ) -> Result<ExecutionResult, ExecError> {
        self.runtime.block_on(
            self.inner
                .execute_remote_script(target_id, script_ref, args, upload_first),
        )
    }

    pub fn upload_file(
        &self,
        target_id: &str,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> Result<TransferResult, ExecError> {
        self.runtime
            .block_on(self.inner.upload_file(target_id, local_path, remote_path))
    }

    pub fn download_file(
        &self,
        target_id: &str,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<TransferResult, ExecError> {
        self.runtime
            .block_on(self.inner.download_file(target_id, remote_path, local_path))
    }
}
