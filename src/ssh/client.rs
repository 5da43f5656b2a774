// ABOUTME: SSH session management using russh.
// ABOUTME: Handles connection, host key verification, authentication, exec and SFTP transfer.

use super::error::{Error, Result};
use parking_lot::Mutex;
use russh::client::{self, Config, Handle, Msg};
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{Channel, ChannelMsg, Disconnect, Sig};
use russh_sftp::client::SftpSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::{Instant, timeout_at};

/// Configuration for establishing an SSH session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote host to connect to.
    pub host: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// Username for authentication.
    pub user: String,
    /// Private key used for public key authentication.
    pub key_path: PathBuf,
    /// Whether to accept unknown hosts (Trust On First Use).
    /// A host whose key changed is always rejected.
    pub trust_on_first_use: bool,
    /// Optional path to known_hosts file.
    /// If None, uses the default ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
    /// Upper bound for TCP connect, key exchange and authentication.
    pub connect_timeout: Duration,
    /// Interval between keepalives on an idle link. A command that
    /// prints nothing for a long time keeps its session as long as the
    /// server answers.
    pub keepalive_interval: Duration,
}

/// Unanswered keepalives tolerated before the link is declared dead.
const KEEPALIVE_MAX: usize = 3;

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key_path: key_path.into(),
            trust_on_first_use: false,
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(15),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn trust_on_first_use(mut self, tofu: bool) -> Self {
        self.trust_on_first_use = tofu;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// russh settings: no inactivity cutoff, dead links are found by keepalive.
    fn russh_config(&self) -> Config {
        Config {
            inactivity_timeout: None,
            keepalive_interval: Some(self.keepalive_interval),
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        }
    }

    fn key_file_name(&self) -> String {
        self.key_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Output from a remote command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code of the command.
    pub exit_code: u32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Outcome of the server key check, read back after a failed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostKeyVerdict {
    Trusted,
    Learned,
    Unknown,
    Changed,
}

/// SSH client handler for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
    verdict: Arc<Mutex<Option<HostKeyVerdict>>>,
}

impl SshHandler {
    fn new(config: &SessionConfig, verdict: Arc<Mutex<Option<HostKeyVerdict>>>) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            trust_on_first_use: config.trust_on_first_use,
            known_hosts_path: config.known_hosts_path.clone(),
            verdict,
        }
    }

    fn learn(&self, server_public_key: &ssh_key::PublicKey) {
        let learn_result = match &self.known_hosts_path {
            Some(path) => learn_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => learn_known_hosts(&self.host, self.port, server_public_key),
        };
        if let Err(e) = learn_result {
            tracing::warn!("Failed to save host key to known_hosts: {}", e);
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let check_result = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        let verdict = match check_result {
            Ok(true) => HostKeyVerdict::Trusted,
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::error!(
                    host = %self.host,
                    port = self.port,
                    "HOST KEY CHANGED: refusing to connect"
                );
                HostKeyVerdict::Changed
            }
            Ok(false) | Err(_) if self.trust_on_first_use => {
                tracing::warn!(
                    "Trust-On-First-Use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                self.learn(server_public_key);
                HostKeyVerdict::Learned
            }
            Ok(false) | Err(_) => HostKeyVerdict::Unknown,
        };

        *self.verdict.lock() = Some(verdict);
        Ok(matches!(
            verdict,
            HostKeyVerdict::Trusted | HostKeyVerdict::Learned
        ))
    }
}

/// An established SSH session.
pub struct Session {
    config: SessionConfig,
    handle: Handle<SshHandler>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("user", &self.config.user)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Session {
    /// Connect and authenticate, bounded by `config.connect_timeout`.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let limit = config.connect_timeout;
        match tokio::time::timeout(limit, Self::connect_inner(&config)).await {
            Ok(Ok(handle)) => Ok(Self { config, handle }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Connection(format!(
                "timed out connecting to {}:{} after {:?}",
                config.host, config.port, limit
            ))),
        }
    }

    async fn connect_inner(config: &SessionConfig) -> Result<Handle<SshHandler>> {
        let key = load_secret_key(&config.key_path, None).map_err(|e| Error::KeyLoadFailed {
            key: config.key_file_name(),
            reason: e.to_string(),
        })?;

        let verdict = Arc::new(Mutex::new(None));
        let handler = SshHandler::new(config, Arc::clone(&verdict));

        let connected = client::connect(
            Arc::new(config.russh_config()),
            (config.host.as_str(), config.port),
            handler,
        )
        .await;

        let mut session = match connected {
            Ok(session) => session,
            Err(e) => {
                let host = config.host.clone();
                let port = config.port;
                return Err(match *verdict.lock() {
                    Some(HostKeyVerdict::Changed) => Error::HostKeyMismatch { host, port },
                    Some(HostKeyVerdict::Unknown) => Error::UnknownHostKey { host, port },
                    _ if e.to_string().contains("Connection refused") => {
                        Error::Connection(format!("connection refused to {}:{}", host, port))
                    }
                    _ => Error::Connection(e.to_string()),
                });
            }
        };

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .map_err(Error::during_handshake)?
            .flatten();

        let result = session
            .authenticate_publickey(
                &config.user,
                PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
            )
            .await
            .map_err(Error::during_handshake)?;

        if !result.success() {
            return Err(Error::AuthenticationFailed);
        }

        Ok(session)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Execute a command with a wall-clock limit.
    ///
    /// No PTY is requested and nothing is written to the remote stdin, so a
    /// command waiting for input simply runs into the limit. On expiry the
    /// remote process is sent SIGKILL and the channel is closed.
    pub async fn exec_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let deadline = Instant::now() + timeout;

        let mut channel = match timeout_at(deadline, self.open_exec_channel(command)).await {
            Ok(channel) => channel?,
            Err(_) => return Err(Error::CommandTimeout(timeout)),
        };

        let collected = timeout_at(deadline, Self::collect_output(&mut channel)).await;
        match collected {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(host = %self.config.host, "terminating timed out channel");
                let _ = channel.signal(Sig::KILL).await;
                let _ = channel.close().await;
                Err(Error::CommandTimeout(timeout))
            }
        }
    }

    async fn open_exec_channel(&self, command: &str) -> Result<Channel<Msg>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::CommandFailed(format!("failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::CommandFailed(format!("failed to exec command: {}", e)))?;

        Ok(channel)
    }

    async fn collect_output(channel: &mut Channel<Msg>) -> Result<CommandOutput> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = 0u32;

        let mut got_exit_status = false;
        let mut got_eof = false;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        // stderr
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = exit_status;
                    got_exit_status = true;
                    if got_eof {
                        break;
                    }
                }
                Some(ChannelMsg::Eof) => {
                    got_eof = true;
                    if got_exit_status {
                        break;
                    }
                }
                Some(ChannelMsg::Close) => {
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }

        // Closed without an exit status: killed by signal or the link dropped.
        if !got_exit_status {
            return Err(Error::ChannelClosed);
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        })
    }

    async fn open_sftp(&self) -> Result<SftpSession> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }

    /// Stream a local file to `remote_path`, replacing it. Returns bytes sent.
    pub async fn upload(&self, local_path: &Path, remote_path: &str, timeout: Duration) -> Result<u64> {
        let transfer = async {
            let mut source = tokio::fs::File::open(local_path).await?;
            let sftp = self.open_sftp().await?;
            let mut dest = sftp
                .create(remote_path)
                .await
                .map_err(|e| Error::Transfer(format!("cannot create {remote_path}: {e}")))?;
            let bytes = tokio::io::copy(&mut source, &mut dest).await?;
            dest.shutdown().await?;
            sftp.close().await?;
            Ok::<u64, Error>(bytes)
        };

        match tokio::time::timeout(timeout, transfer).await {
            Ok(result) => result,
            Err(_) => Err(Error::CommandTimeout(timeout)),
        }
    }

    /// Stream `remote_path` into a local file, replacing it. Returns bytes received.
    pub async fn download(&self, remote_path: &str, local_path: &Path, timeout: Duration) -> Result<u64> {
        let transfer = async {
            let sftp = self.open_sftp().await?;
            let mut source = sftp
                .open(remote_path)
                .await
                .map_err(|e| Error::Transfer(format!("cannot open {remote_path}: {e}")))?;
            let mut dest = tokio::fs::File::create(local_path).await?;
            let bytes = tokio::io::copy(&mut source, &mut dest).await?;
            dest.sync_all().await?;
            sftp.close().await?;
            Ok::<u64, Error>(bytes)
        };

        match tokio::time::timeout(timeout, transfer).await {
            Ok(result) => result,
            Err(_) => Err(Error::CommandTimeout(timeout)),
        }
    }

    /// Disconnect the session.
    pub async fn disconnect(self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)?;
        Ok(())
    }
}
