//! Temporal versioned entity store.
//!
//! Every observed version of an entity is kept as a row with a half-open
//! validity interval `[life_start, life_end)`. Rows are never mutated in
//! place: an update seals the live row and appends a successor, a deletion
//! only seals. For one `(account, key)` at most one row is live
//! (`life_end == OPEN`) and consecutive rows share their boundary timestamp.

mod memory;
mod persistence;

#[cfg(test)]
mod tests;

pub use memory::MemoryStore;

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::types::{AccountId, Timestamp, OPEN};

/// One stored version of an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Version<K, C> {
    pub account: AccountId,
    pub key: K,
    pub content: C,
    pub life_start: Timestamp,
    pub life_end: Timestamp,
}

impl<K, C> Version<K, C> {
    pub fn is_live(&self) -> bool {
        self.life_end == OPEN
    }

    pub fn valid_at(&self, at: Timestamp) -> bool {
        self.life_start <= at && at < self.life_end
    }
}

/// One page of a point-in-time listing. `next` is the continuation key to
/// pass back as `after` for the following page.
#[derive(Clone, Debug)]
pub struct Page<K, C> {
    pub items: Vec<Version<K, C>>,
    pub next: Option<K>,
}

/// Mutations produced by one reconciliation pass, applied with a single
/// timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeSet<K, C> {
    pub inserts: Vec<(K, C)>,
    pub evolves: Vec<(K, C)>,
    pub expires: Vec<K>,
}

impl<K, C> Default for ChangeSet<K, C> {
    fn default() -> Self {
        Self {
            inserts: Vec::new(),
            evolves: Vec::new(),
            expires: Vec::new(),
        }
    }
}

impl<K, C> ChangeSet<K, C> {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.evolves.is_empty() && self.expires.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.evolves.len() + self.expires.len()
    }
}

/// Row filter used by [`TemporalStore::list_as_of`].
pub type RowFilter<'a, K, C> = &'a (dyn Fn(&Version<K, C>) -> bool + Sync);

/// Storage for one entity category.
///
/// Implementations must make [`TemporalStore::apply`] atomic: readers see
/// either none or all of a change set, and an invalid change set leaves the
/// store untouched.
pub trait TemporalStore<K, C>: Send + Sync
where
    K: Ord + Clone + Debug + Send + Sync,
    C: Clone + Send + Sync,
{
    /// The live version of `key`, if any.
    fn get_live(&self, account: AccountId, key: &K) -> StorageResult<Option<Version<K, C>>>;

    /// The version of `key` valid at `at`.
    fn get_as_of(
        &self,
        account: AccountId,
        key: &K,
        at: Timestamp,
    ) -> StorageResult<Option<Version<K, C>>>;

    /// Versions valid at `at` matching `filter`, ordered by key, starting
    /// strictly after `after`.
    fn list_as_of(
        &self,
        account: AccountId,
        at: Timestamp,
        filter: RowFilter<'_, K, C>,
        page_size: usize,
        after: Option<&K>,
    ) -> StorageResult<Page<K, C>>;

    /// Every live version for the account.
    fn live_set(&self, account: AccountId) -> StorageResult<Vec<Version<K, C>>>;

    /// Every version ever stored for `key`, oldest first.
    fn history(&self, account: AccountId, key: &K) -> StorageResult<Vec<Version<K, C>>>;

    fn apply(&self, account: AccountId, changes: ChangeSet<K, C>, now: Timestamp)
        -> StorageResult<()>;

    /// Creates a live row. Fails with `LiveVersionExists` if one is already live.
    fn insert(&self, account: AccountId, key: K, content: C, now: Timestamp) -> StorageResult<()> {
        let mut changes = ChangeSet::default();
        changes.inserts.push((key, content));
        self.apply(account, changes, now)
    }

    /// Seals the live row at `now` and opens a successor with `content`.
    /// Behaves as `insert` when nothing is live.
    fn evolve(&self, account: AccountId, key: K, content: C, now: Timestamp) -> StorageResult<()> {
        let mut changes = ChangeSet::default();
        changes.evolves.push((key, content));
        self.apply(account, changes, now)
    }

    /// Seals the live row at `now` without a successor.
    fn expire(&self, account: AccountId, key: K, now: Timestamp) -> StorageResult<()> {
        let mut changes = ChangeSet::default();
        changes.expires.push(key);
        self.apply(account, changes, now)
    }

    /// Collects every page of [`TemporalStore::list_as_of`].
    fn list_all_as_of(
        &self,
        account: AccountId,
        at: Timestamp,
        filter: RowFilter<'_, K, C>,
        page_size: usize,
    ) -> StorageResult<Vec<Version<K, C>>> {
        let mut rows = Vec::new();
        let mut after: Option<K> = None;
        loop {
            let page = self.list_as_of(account, at, filter, page_size, after.as_ref())?;
            rows.extend(page.items);
            match page.next {
                Some(next) => after = Some(next),
                None => break,
            }
        }
        Ok(rows)
    }
}

/// Filter accepting every row.
pub fn all_rows<K, C>(_: &Version<K, C>) -> bool {
    true
}
