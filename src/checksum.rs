// ABOUTME: File digests used to verify transfers end to end.
// ABOUTME: Local digests are streamed with sha2; remote ones come from sha*sum.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::shell;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("unsupported digest algorithm: {0}")]
    Unsupported(String),

    #[error("unexpected digest output: {0:?}")]
    UnexpectedOutput(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    #[serde(alias = "sha-256")]
    Sha256,
    #[serde(alias = "sha-512")]
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the lowercase hex encoding.
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }

    /// Command that prints the digest of `path` on a remote host.
    pub fn remote_command(&self, path: &str) -> String {
        format!("{}sum -- {}", self.as_str(), shell::quote(path))
    }

    /// Extract the hex digest from `sha*sum` output (`<hex>  <path>`).
    pub fn parse_remote_output(&self, stdout: &str) -> Result<String, ChecksumError> {
        let token = stdout
            .split_whitespace()
            .next()
            .map(|t| t.trim_start_matches('\\'))
            .unwrap_or_default();

        if token.len() != self.hex_len() || !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumError::UnexpectedOutput(stdout.trim().to_string()));
        }
        Ok(token.to_ascii_lowercase())
    }

    pub fn digest_bytes(&self, data: &[u8]) -> String {
        let mut hasher = Hasher::new(*self);
        hasher.update(data);
        hasher.finish()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(DigestAlgorithm::Sha512),
            other => Err(ChecksumError::Unsupported(other.to_string())),
        }
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
            Hasher::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Stream a local file through the digest.
pub async fn digest_file(path: &Path, algorithm: DigestAlgorithm) -> Result<String, ChecksumError> {
    let read_err = |source| ChecksumError::Read {
        path: path.display().to_string(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(read_err)?;
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = file.read(&mut buf).await.map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finish())
}
