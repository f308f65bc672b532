use crate::job::{Message, TargetId};
use core::future::Future;
use core::pin::Pin;
use serde::{Deserialize, Serialize};

pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SessionError>> + Send + 'a>>;

/// Failure reported by a [`SessionHandle`] operation.
///
/// The variant decides how the dispatch engine reacts: transient failures and timeouts are
/// retried, an unreachable target is skipped, and a fatal error stops the whole job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("target {target} unreachable: {reason}")]
    TargetUnreachable { target: String, reason: String },
    #[error("session unusable: {0}")]
    Fatal(String),
    #[error("session already closed")]
    Closed,
}

impl SessionError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    /// Fatal errors and closed sessions cannot be recovered by retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::Closed)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout { .. })
    }
}

/// One conversation as listed by the remote service, before ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub thread_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    /// Unix timestamp (seconds) of the latest activity, when the service exposes one.
    #[serde(default)]
    pub last_activity: Option<i64>,
}

/// Authenticated capability to deliver messages to conversation targets.
///
/// Implementations must be safe for concurrent use: every worker of one engine shares the same
/// handle. A handle is owned by exactly one running engine; the engine closes it on every
/// terminal path.
pub trait SessionHandle: Send + Sync + 'static {
    /// Human readable label used in logs (account name, never a secret).
    fn label(&self) -> &str;

    /// Delivers one message to one target.
    fn send_one<'a>(&'a self, target: &'a TargetId, message: &'a Message) -> SessionFuture<'a, ()>;

    /// Refreshes the channel used by `worker` so it stays responsive.
    fn refresh(&self, _worker: usize) -> SessionFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Lists candidate conversation targets in the service's natural order.
    fn list_threads(&self, limit: usize) -> SessionFuture<'_, Vec<ThreadRecord>>;

    /// Releases the session. Must be idempotent and safe after a fatal error.
    fn close(&self) -> SessionFuture<'_, ()>;
}
