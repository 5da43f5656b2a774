// ABOUTME: Operation state markers for the type state pattern.
// ABOUTME: States carry the data that is only valid once they are reached.

use crate::config::Target;
use crate::transport::RemoteSession;

/// Created, nothing checked yet.
/// Available actions: `validate()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Pending;

/// Target passed the allow-list.
/// Available actions: `connect()`
#[derive(Debug, Clone)]
pub struct Validated {
    pub(crate) target: Target,
}

/// Session open; the operation is executing.
/// Available actions: `session()`, `close()`
pub struct Connected {
    pub(crate) target: Target,
    pub(crate) session: Box<dyn RemoteSession>,
}

impl std::fmt::Debug for Connected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connected")
            .field("target", &self.target.id)
            .finish_non_exhaustive()
    }
}

/// Session released; only the audit record remains to be written.
#[derive(Debug, Clone)]
pub struct Closed {
    pub(crate) target: Target,
}
