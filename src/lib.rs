// ABOUTME: Library root for labexec, the audited remote execution layer.
// ABOUTME: RemoteExecutor in `executor` is the entry point; the rest are its parts.

pub mod audit;
pub mod checksum;
pub mod config;
pub mod error;
pub mod executor;
pub mod keys;
pub mod registry;
pub mod shell;
pub mod ssh;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use config::Config;
pub use executor::{BlockingExecutor, ErrorKind, ExecError, RemoteExecutor};
