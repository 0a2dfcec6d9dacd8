use serde::{Deserialize, Serialize};

use crate::types::{AccountId, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    NotProcessed,
    Updated,
    SyncError,
    /// Completed with a non-fatal anomaly; scheduled like `Updated`.
    Warning,
}

impl SyncStatus {
    pub fn is_success(self) -> bool {
        matches!(self, SyncStatus::Updated | SyncStatus::Warning)
    }
}

/// One attempt for an (account, category). Unfinished while `finished_at`
/// is `None`; claimed while `started_at` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerRecord {
    pub account: AccountId,
    pub category: String,
    pub scheduled_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub status: SyncStatus,
    pub detail: Option<String>,
}

impl TrackerRecord {
    pub fn scheduled(account: AccountId, category: &str, scheduled_at: Timestamp) -> Self {
        Self {
            account,
            category: category.to_string(),
            scheduled_at,
            started_at: None,
            finished_at: None,
            status: SyncStatus::NotProcessed,
            detail: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Account-level view of a category: last finished status and until when the
/// remote said its data stays cached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryState {
    pub status: SyncStatus,
    pub cache_expiry: Timestamp,
}

/// Result of trying to claim the unfinished tracker.
#[derive(Clone, Debug, PartialEq)]
pub enum Claim {
    /// The caller owns the attempt; `started_at` is set.
    Claimed(TrackerRecord),
    NotDue { scheduled_at: Timestamp },
    CacheValid { status: SyncStatus, cache_expiry: Timestamp },
    AlreadyRunning { started_at: Timestamp },
}

/// How a claimed attempt ended.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub status: SyncStatus,
    pub detail: Option<String>,
    pub next_scheduled_at: Timestamp,
    pub cache_expiry: Timestamp,
}
