use thiserror::Error;

use crate::types::AccountId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("live version already exists for {account} key {key}")]
    LiveVersionExists { account: AccountId, key: String },
    #[error("no live version for {account} key {key}")]
    NoLiveVersion { account: AccountId, key: String },
    /// `now` lies before the latest boundary of the key's history (the live
    /// row's start, or the last seal when nothing is live).
    #[error("{account} key {key}: transition at {now} precedes latest version boundary {boundary}")]
    StaleTimestamp {
        account: AccountId,
        key: String,
        boundary: i64,
        now: i64,
    },
    #[error("{what} lock poisoned")]
    Poisoned { what: &'static str },
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage backend error: {message}")]
    Backend { message: String },
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Errors escaping a synchronization run. Remote failures never do: they are
/// recorded on the tracker instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}
