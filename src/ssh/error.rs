// ABOUTME: SSH-specific error types.
// ABOUTME: Covers connection, authentication, host key, execution and transfer failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("host key for {host}:{port} does not match the known_hosts entry")]
    HostKeyMismatch { host: String, port: u16 },

    #[error("host {host}:{port} is not in known_hosts")]
    UnknownHostKey { host: String, port: u16 },

    #[error("authentication failed: key rejected by server")]
    AuthenticationFailed,

    #[error("failed to load private key {key}: {reason}")]
    KeyLoadFailed { key: String, reason: String },

    #[error("command execution failed: {0}")]
    CommandFailed(String),

    #[error("command timed out after {0:?}")]
    CommandTimeout(std::time::Duration),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("file transfer failed: {0}")]
    Transfer(String),

    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a russh failure raised before authentication completed.
    ///
    /// A link that drops mid-handshake is a connection failure, not a protocol one.
    pub(crate) fn during_handshake(source: russh::Error) -> Self {
        if is_link_failure(&source) {
            Error::Connection(source.to_string())
        } else {
            Error::Protocol(source)
        }
    }

    /// Transient network failures that a fresh connection attempt may fix.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Protocol(e) => is_link_failure(e),
            _ => false,
        }
    }

    /// Failures that indicate an identity or trust problem.
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Error::HostKeyMismatch { .. }
                | Error::UnknownHostKey { .. }
                | Error::AuthenticationFailed
                | Error::KeyLoadFailed { .. }
        )
    }
}

fn is_link_failure(error: &russh::Error) -> bool {
    matches!(
        error,
        russh::Error::Disconnect
            | russh::Error::HUP
            | russh::Error::IO(_)
            | russh::Error::ConnectionTimeout
            | russh::Error::KeepaliveTimeout
            | russh::Error::InactivityTimeout
            | russh::Error::SendError
            | russh::Error::RecvError
    )
}

pub type Result<T> = std::result::Result<T, Error>;
