//! Sync tracker state machine.
//!
//! Each (account, category) has exactly one unfinished tracker describing the
//! next attempt, plus a history of finished ones. An attempt moves
//! `NOT_PROCESSED -> UPDATED | WARNING | SYNC_ERROR`; finishing it always
//! schedules a fresh unfinished tracker.
//!
//! Claiming the unfinished tracker (read, decide, mark started) happens under
//! the tracker store's lock, so two concurrent invocations for the same
//! account and category can never both run.

pub mod logic;
mod memory;
pub mod state;

#[cfg(test)]
mod tests;

pub use logic::Decision;
pub use memory::MemoryTrackerStore;
pub use state::{CategoryState, Claim, Outcome, SyncStatus, TrackerRecord};

use crate::error::StorageResult;
use crate::types::{AccountId, Timestamp};

pub trait TrackerStore: Send + Sync {
    /// Atomically checks whether an attempt may start and, if so, marks the
    /// unfinished tracker started at `now`.
    fn claim(&self, account: AccountId, category: &str, now: Timestamp) -> StorageResult<Claim>;

    /// Returns a claimed tracker to its pre-run state.
    fn release(&self, account: AccountId, category: &str) -> StorageResult<()>;

    /// Finishes the claimed tracker, records the account-level category state
    /// and schedules the next attempt. Returns the finished record.
    fn finish(
        &self,
        account: AccountId,
        category: &str,
        outcome: Outcome,
        now: Timestamp,
    ) -> StorageResult<TrackerRecord>;

    /// Moves the unfinished tracker's due time.
    fn reschedule(&self, account: AccountId, category: &str, at: Timestamp) -> StorageResult<()>;

    fn unfinished(
        &self,
        account: AccountId,
        category: &str,
    ) -> StorageResult<Option<TrackerRecord>>;

    fn category_state(
        &self,
        account: AccountId,
        category: &str,
    ) -> StorageResult<Option<CategoryState>>;

    /// Finished trackers, oldest first.
    fn history(&self, account: AccountId, category: &str) -> StorageResult<Vec<TrackerRecord>>;
}
