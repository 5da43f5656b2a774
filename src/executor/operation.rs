// ABOUTME: One logical operation moving Pending -> Validated -> Connected -> Closed.
// ABOUTME: Every state can conclude into exactly one audit record.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::audit::{AuditRecord, AuditStatus, OperationKind};
use crate::config::Target;
use crate::keys::KeyResolver;
use crate::registry::TargetRegistry;
use crate::transport::{Connector, RemoteSession};

use super::error::ExecError;
use super::retry::RetryPolicy;
use super::state::{Closed, Connected, Pending, Validated};

/// Result type for transitions that hand the operation back on failure so it
/// can still be concluded.
pub type TransitionResult<T, S> = Result<Operation<T>, (Operation<S>, ExecError)>;

#[derive(Debug)]
pub struct Operation<S> {
    requested_id: String,
    kind: OperationKind,
    subject: Option<String>,
    started_at: DateTime<Utc>,
    clock: Instant,
    attempts: u32,
    state: S,
}

impl<S> Operation<S> {
    fn transition<T>(self, state: T) -> Operation<T> {
        Operation {
            requested_id: self.requested_id,
            kind: self.kind,
            subject: self.subject,
            started_at: self.started_at,
            clock: self.clock,
            attempts: self.attempts,
            state,
        }
    }

    pub fn requested_id(&self) -> &str {
        &self.requested_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    /// Terminal step: produce the audit record for this operation.
    pub fn conclude(self, actor: &str, status: AuditStatus, error_kind: Option<super::ErrorKind>) -> AuditRecord {
        AuditRecord {
            actor: actor.to_string(),
            target_id: self.requested_id,
            operation: self.kind,
            subject: self.subject,
            started_at: self.started_at,
            ended_at: Utc::now(),
            status,
            error_kind,
            attempts: self.attempts,
        }
    }
}

impl Operation<Pending> {
    pub fn new(requested_id: impl Into<String>, kind: OperationKind, subject: Option<String>) -> Self {
        Operation {
            requested_id: requested_id.into(),
            kind,
            subject,
            started_at: Utc::now(),
            clock: Instant::now(),
            attempts: 0,
            state: Pending,
        }
    }

    /// Check the allow-list. No I/O happens before this succeeds.
    pub fn validate(self, registry: &TargetRegistry) -> TransitionResult<Validated, Pending> {
        match registry.resolve(&self.requested_id) {
            Ok(target) => {
                let target = target.clone();
                Ok(self.transition(Validated { target }))
            }
            Err(reason) => {
                warn!(target_id = %self.requested_id, %reason, "rejected operation");
                let err = ExecError::TargetNotAllowed {
                    target_id: self.requested_id.clone(),
                    reason,
                };
                Err((self, err))
            }
        }
    }
}

impl Operation<Validated> {
    pub fn target(&self) -> &Target {
        &self.state.target
    }

    /// Resolve the key and open a session, retrying transient failures with
    /// a fresh connection each time.
    pub async fn connect(
        mut self,
        connector: &dyn Connector,
        keys: &KeyResolver,
        retry: &RetryPolicy,
        connect_timeout: Duration,
    ) -> TransitionResult<Connected, Validated> {
        let key = match keys.resolve_key_async(&self.state.target.id).await {
            Ok(key) => key,
            Err(source) => return Err((self, ExecError::KeyNotFound { source })),
        };

        loop {
            self.attempts += 1;
            let attempt = self.attempts;
            debug!(
                target_id = %self.state.target.id,
                address = %self.state.target.address(),
                attempt,
                "connecting"
            );

            let connected = connector
                .connect(&self.state.target, &key, connect_timeout)
                .await;
            match connected {
                Ok(session) => {
                    let target = self.state.target.clone();
                    return Ok(self.transition(Connected { target, session }));
                }
                Err(e) if e.is_transient() && attempt < retry.max_attempts() => {
                    let delay = retry.delay_after(attempt);
                    warn!(
                        target_id = %self.state.target.id,
                        attempt,
                        error = %e,
                        retry_in = ?delay,
                        "transient connection failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_security() {
                        error!(
                            target_id = %self.state.target.id,
                            address = %self.state.target.address(),
                            error = %e,
                            "refusing target: identity check failed"
                        );
                    }
                    let err = ExecError::from_connect(self.state.target.id.clone(), attempt, e);
                    return Err((self, err));
                }
            }
        }
    }
}

impl Operation<Connected> {
    pub fn target(&self) -> &Target {
        &self.state.target
    }

    pub fn session(&self) -> &dyn RemoteSession {
        self.state.session.as_ref()
    }

    /// Disconnect. Disconnect failures are logged and do not change the outcome.
    pub async fn close(self) -> Operation<Closed> {
        let Connected { target, session } = self.state;
        if let Err(e) = session.close().await {
            warn!(target_id = %target.id, error = %e, "SSH disconnect failed");
        }
        Operation {
            requested_id: self.requested_id,
            kind: self.kind,
            subject: self.subject,
            started_at: self.started_at,
            clock: self.clock,
            attempts: self.attempts,
            state: Closed { target },
        }
    }
}

impl Operation<Closed> {
    pub fn target(&self) -> &Target {
        &self.state.target
    }
}
