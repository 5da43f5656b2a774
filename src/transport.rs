// ABOUTME: Transport seam between the executor and SSH.
// ABOUTME: One Connector call yields one session that serves exactly one operation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ExecutionPolicy, Target};
use crate::keys::KeyReference;
use crate::ssh::{self, CommandOutput, Session, SessionConfig};

/// Opens authenticated, host-key-verified sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &Target,
        key: &KeyReference,
        connect_timeout: Duration,
    ) -> ssh::Result<Box<dyn RemoteSession>>;
}

/// Primitives available on an open session.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a non-interactive command, bounded by `timeout`.
    async fn run(&self, command: &str, timeout: Duration) -> ssh::Result<CommandOutput>;

    /// Stream a local file to the remote host.
    async fn put(&self, local_path: &Path, remote_path: &str, timeout: Duration) -> ssh::Result<u64>;

    /// Stream a remote file to the local host.
    async fn get(&self, remote_path: &str, local_path: &Path, timeout: Duration) -> ssh::Result<u64>;

    async fn close(self: Box<Self>) -> ssh::Result<()>;
}

/// Production connector backed by russh.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    known_hosts_path: Option<PathBuf>,
    trust_on_first_use: bool,
}

impl SshConnector {
    pub fn new(known_hosts_path: Option<PathBuf>, trust_on_first_use: bool) -> Self {
        Self {
            known_hosts_path,
            trust_on_first_use,
        }
    }

    pub fn from_policy(policy: &ExecutionPolicy) -> Self {
        Self::new(
            policy.known_hosts_path.clone(),
            policy.trust_first_connection,
        )
    }

    fn session_config(&self, target: &Target, key: &KeyReference, connect_timeout: Duration) -> SessionConfig {
        let mut config = SessionConfig::new(&target.host, &target.user, key.path())
            .port(target.port)
            .trust_on_first_use(self.trust_on_first_use)
            .connect_timeout(connect_timeout);
        if let Some(path) = &self.known_hosts_path {
            config = config.known_hosts_path(path);
        }
        config
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        target: &Target,
        key: &KeyReference,
        connect_timeout: Duration,
    ) -> ssh::Result<Box<dyn RemoteSession>> {
        let session = Session::connect(self.session_config(target, key, connect_timeout)).await?;
        Ok(Box::new(session))
    }
}

#[async_trait]
impl RemoteSession for Session {
    async fn run(&self, command: &str, timeout: Duration) -> ssh::Result<CommandOutput> {
        self.exec_with_timeout(command, timeout).await
    }

    async fn put(&self, local_path: &Path, remote_path: &str, timeout: Duration) -> ssh::Result<u64> {
        self.upload(local_path, remote_path, timeout).await
    }

    async fn get(&self, remote_path: &str, local_path: &Path, timeout: Duration) -> ssh::Result<u64> {
        self.download(remote_path, local_path, timeout).await
    }

    async fn close(self: Box<Self>) -> ssh::Result<()> {
        self.disconnect().await
    }
}
