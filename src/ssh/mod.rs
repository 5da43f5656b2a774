// ABOUTME: SSH client module for remote target connections.
// ABOUTME: Key-based authentication with mandatory known_hosts verification.

mod client;
mod error;

pub use client::{CommandOutput, Session, SessionConfig};
pub use error::{Error, Result};
