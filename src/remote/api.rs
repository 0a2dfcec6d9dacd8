use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AccountId, Cursor, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rate limiting, 5xx, timeouts.
    Transient,
    /// Authentication failures, revoked or invalid account scope.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => f.write_str("transient"),
            ErrorKind::Fatal => f.write_str("fatal"),
        }
    }
}

/// A failed remote call, already classified by the client.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{kind} remote error: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after: Option<Timestamp>,
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, at: Timestamp) -> Self {
        self.retry_after = Some(at);
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }

    /// Server-supplied time before which the call should not be retried.
    pub fn retry_after(&self) -> Option<Timestamp> {
        self.retry_after
    }
}

/// One page of a remote snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct RemotePage<I> {
    pub items: Vec<I>,
    /// Server cache-expiry hint for this data.
    pub cache_expiry: Option<Timestamp>,
    /// Continuation for the next page; `None` when the server has no more.
    pub next: Option<Cursor>,
}

impl<I> RemotePage<I> {
    pub fn last(items: Vec<I>, cache_expiry: Option<Timestamp>) -> Self {
        Self {
            items,
            cache_expiry,
            next: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Client for one category of remote data.
///
/// Implementations own transport, wire format and timeouts; a timeout is
/// reported as a transient [`RemoteError`].
#[async_trait]
pub trait RemoteApi<I: Send>: Send + Sync {
    async fn fetch(&self, account: AccountId, cursor: Option<Cursor>)
        -> Result<RemotePage<I>, RemoteError>;
}
