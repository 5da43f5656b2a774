// ABOUTME: In-memory transport standing in for SSH in executor tests.
// ABOUTME: Interprets the handful of shell commands the executor sends.

use async_trait::async_trait;
use labexec::checksum::DigestAlgorithm;
use labexec::config::Target;
use labexec::keys::KeyReference;
use labexec::ssh::{self, CommandOutput};
use labexec::transport::{Connector, RemoteSession};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Files and command history shared by every session of one connector.
#[derive(Debug, Default)]
pub struct FakeRemote {
    files: Mutex<HashMap<String, Vec<u8>>>,
    commands: Mutex<Vec<String>>,
    corrupt_digests: AtomicBool,
    killed: AtomicU32,
}

impl FakeRemote {
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    pub fn put_file(&self, path: &str, contents: &[u8]) {
        self.files.lock().insert(path.to_string(), contents.to_vec());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Make every `sha*sum` report a digest that matches nothing.
    pub fn corrupt_digests(&self) {
        self.corrupt_digests.store(true, Ordering::SeqCst);
    }

    /// Commands that were terminated on timeout.
    pub fn killed(&self) -> u32 {
        self.killed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    HostKeyMismatch,
    UnknownHostKey,
    Authentication,
}

#[derive(Debug, Default)]
pub struct FakeConnector {
    remote: Arc<FakeRemote>,
    transient_failures: AtomicU32,
    dropped_handshakes: AtomicU32,
    permanent_failure: Mutex<Option<ConnectFailure>>,
    connects: AtomicU32,
    open_sessions: Arc<AtomicU32>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remote(&self) -> &FakeRemote {
        &self.remote
    }

    /// Fail the next `n` connection attempts with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Drop the link during authentication on the next `n` attempts.
    pub fn drop_next_handshakes(&self, n: u32) {
        self.dropped_handshakes.store(n, Ordering::SeqCst);
    }

    pub fn fail_always(&self, failure: ConnectFailure) {
        *self.permanent_failure.lock() = Some(failure);
    }

    /// Connection attempts seen, failed ones included.
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> u32 {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        target: &Target,
        key: &KeyReference,
        _connect_timeout: Duration,
    ) -> ssh::Result<Box<dyn RemoteSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        assert_eq!(key.target_id(), &target.id, "key resolved for another target");

        let host = target.host.clone();
        let port = target.port;
        match *self.permanent_failure.lock() {
            Some(ConnectFailure::HostKeyMismatch) => {
                return Err(ssh::Error::HostKeyMismatch { host, port });
            }
            Some(ConnectFailure::UnknownHostKey) => {
                return Err(ssh::Error::UnknownHostKey { host, port });
            }
            Some(ConnectFailure::Authentication) => return Err(ssh::Error::AuthenticationFailed),
            None => {}
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ssh::Error::Connection("connection reset by peer".to_string()));
        }

        let remaining = self.dropped_handshakes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.dropped_handshakes.store(remaining - 1, Ordering::SeqCst);
            return Err(ssh::Error::Protocol(russh::Error::Disconnect));
        }

        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            remote: Arc::clone(&self.remote),
            open_sessions: Arc::clone(&self.open_sessions),
        }))
    }
}

struct FakeSession {
    remote: Arc<FakeRemote>,
    open_sessions: Arc<AtomicU32>,
}

fn output(exit_code: u32, stdout: impl Into<String>, stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: stdout.into(),
        stderr: stderr.into(),
    }
}

/// Undo single-quote shell quoting for the simple paths used in tests.
fn unquote(word: &str) -> String {
    word.trim()
        .trim_start_matches('\'')
        .trim_end_matches('\'')
        .replace("'\\''", "'")
}

impl FakeSession {
    fn digest(&self, algorithm: DigestAlgorithm, path: &str) -> CommandOutput {
        let Some(contents) = self.remote.file(path) else {
            return output(
                1,
                "",
                format!("{algorithm}sum: {path}: No such file or directory\n"),
            );
        };
        let digest = if self.remote.corrupt_digests.load(Ordering::SeqCst) {
            "0".repeat(algorithm.hex_len())
        } else {
            algorithm.digest_bytes(&contents)
        };
        output(0, format!("{digest}  {path}\n"), "")
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn run(&self, command: &str, timeout: Duration) -> ssh::Result<CommandOutput> {
        self.remote.commands.lock().push(command.to_string());

        if let Some(secs) = command.strip_prefix("sleep ") {
            let secs: f64 = secs.trim().parse().unwrap_or(0.0);
            let nap = tokio::time::sleep(Duration::from_secs_f64(secs));
            return match tokio::time::timeout(timeout, nap).await {
                Ok(()) => Ok(output(0, "", "")),
                Err(_) => {
                    self.remote.killed.fetch_add(1, Ordering::SeqCst);
                    Err(ssh::Error::CommandTimeout(timeout))
                }
            };
        }
        if let Some(code) = command.strip_prefix("exit ") {
            return Ok(output(code.trim().parse().unwrap_or(255), "", ""));
        }
        if let Some(text) = command.strip_prefix("echo ") {
            return Ok(output(0, format!("{}\n", text.trim()), ""));
        }
        if let Some(path) = command.strip_prefix("sha256sum -- ") {
            return Ok(self.digest(DigestAlgorithm::Sha256, &unquote(path)));
        }
        if let Some(path) = command.strip_prefix("sha512sum -- ") {
            return Ok(self.digest(DigestAlgorithm::Sha512, &unquote(path)));
        }
        if let Some(path) = command.strip_prefix("rm -f -- ") {
            self.remote.files.lock().remove(&unquote(path));
            return Ok(output(0, "", ""));
        }
        if command.starts_with("mkdir -p -- ") {
            return Ok(output(0, "", ""));
        }
        if let Some(rest) = command.strip_prefix("chmod 700 -- ") {
            let (path, invocation) = rest.split_once(" && ").unwrap_or((rest, ""));
            let path = unquote(path);
            if self.remote.file(&path).is_none() {
                return Ok(output(
                    1,
                    "",
                    format!("chmod: cannot access '{path}': No such file or directory\n"),
                ));
            }
            return Ok(output(0, format!("ran {invocation}\n"), ""));
        }
        Ok(output(0, "", ""))
    }

    async fn put(&self, local_path: &Path, remote_path: &str, _timeout: Duration) -> ssh::Result<u64> {
        let contents = tokio::fs::read(local_path).await?;
        let bytes = contents.len() as u64;
        self.remote.put_file(remote_path, &contents);
        Ok(bytes)
    }

    async fn get(&self, remote_path: &str, local_path: &Path, _timeout: Duration) -> ssh::Result<u64> {
        let contents = self
            .remote
            .file(remote_path)
            .ok_or_else(|| ssh::Error::Transfer(format!("no such file: {remote_path}")))?;
        tokio::fs::write(local_path, &contents).await?;
        Ok(contents.len() as u64)
    }

    async fn close(self: Box<Self>) -> ssh::Result<()> {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
