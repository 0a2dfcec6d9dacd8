use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::tracker::logic::{decide, Decision};
use crate::tracker::state::{CategoryState, Claim, Outcome, SyncStatus, TrackerRecord};
use crate::tracker::TrackerStore;
use crate::types::{AccountId, Timestamp};

type Slot = (AccountId, String);

#[derive(Default)]
struct Book {
    unfinished: HashMap<Slot, TrackerRecord>,
    finished: HashMap<Slot, Vec<TrackerRecord>>,
    states: HashMap<Slot, CategoryState>,
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    account: AccountId,
    category: String,
    state: CategoryState,
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedBook {
    unfinished: Vec<TrackerRecord>,
    finished: Vec<TrackerRecord>,
    states: Vec<PersistedState>,
}

/// In-process [`TrackerStore`]. One mutex guards the whole book; every
/// operation is a short read-modify-write, which is what makes `claim`
/// atomic.
#[derive(Default)]
pub struct MemoryTrackerStore {
    book: Mutex<Book>,
}

fn slot(account: AccountId, category: &str) -> Slot {
    (account, category.to_string())
}

impl MemoryTrackerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Book>> {
        self.book
            .lock()
            .map_err(|_| StorageError::Poisoned { what: "tracker" })
    }

    /// Writes every tracker and category state to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        let persisted = {
            let book = self.lock()?;
            PersistedBook {
                unfinished: book.unfinished.values().cloned().collect(),
                finished: book.finished.values().flatten().cloned().collect(),
                states: book
                    .states
                    .iter()
                    .map(|((account, category), state)| PersistedState {
                        account: *account,
                        category: category.clone(),
                        state: state.clone(),
                    })
                    .collect(),
            }
        };
        let payload = serde_json::to_vec_pretty(&persisted)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Loads trackers written by [`MemoryTrackerStore::save`]. Claims do not
    /// survive a restart: any started-but-unfinished tracker comes back
    /// unclaimed. A missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = fs::read(path)?;
        let persisted: PersistedBook = serde_json::from_slice(&raw)?;

        let mut book = Book::default();
        for mut tracker in persisted.unfinished {
            tracker.started_at = None;
            book.unfinished
                .insert(slot(tracker.account, &tracker.category), tracker);
        }
        for tracker in persisted.finished {
            book.finished
                .entry(slot(tracker.account, &tracker.category))
                .or_default()
                .push(tracker);
        }
        for history in book.finished.values_mut() {
            history.sort_by_key(|t| t.finished_at);
        }
        for entry in persisted.states {
            book.states
                .insert(slot(entry.account, &entry.category), entry.state);
        }
        Ok(Self {
            book: Mutex::new(book),
        })
    }
}

impl TrackerStore for MemoryTrackerStore {
    fn claim(&self, account: AccountId, category: &str, now: Timestamp) -> StorageResult<Claim> {
        let mut book = self.lock()?;
        let key = slot(account, category);

        let decision = decide(book.unfinished.get(&key), book.states.get(&key), now);
        match decision {
            Decision::AlreadyRunning => {
                let started_at = book
                    .unfinished
                    .get(&key)
                    .and_then(|t| t.started_at)
                    .unwrap_or(now);
                Ok(Claim::AlreadyRunning { started_at })
            }
            Decision::NotDue => {
                let scheduled_at = book
                    .unfinished
                    .get(&key)
                    .map(|t| t.scheduled_at)
                    .unwrap_or(now);
                Ok(Claim::NotDue { scheduled_at })
            }
            Decision::CacheValid => {
                let state = book.states.get(&key).cloned().ok_or_else(|| {
                    StorageError::backend("cache decision without category state")
                })?;
                Ok(Claim::CacheValid {
                    status: state.status,
                    cache_expiry: state.cache_expiry,
                })
            }
            Decision::Run => {
                let tracker = book
                    .unfinished
                    .entry(key)
                    .or_insert_with(|| TrackerRecord::scheduled(account, category, now));
                tracker.started_at = Some(now);
                log::debug!("[TRACKER] {account} {category}: claimed at {now}");
                Ok(Claim::Claimed(tracker.clone()))
            }
        }
    }

    fn release(&self, account: AccountId, category: &str) -> StorageResult<()> {
        let mut book = self.lock()?;
        if let Some(tracker) = book.unfinished.get_mut(&slot(account, category)) {
            tracker.started_at = None;
            log::debug!("[TRACKER] {account} {category}: claim released");
        }
        Ok(())
    }

    fn finish(
        &self,
        account: AccountId,
        category: &str,
        outcome: Outcome,
        now: Timestamp,
    ) -> StorageResult<TrackerRecord> {
        let mut book = self.lock()?;
        let key = slot(account, category);

        let mut tracker = match book.unfinished.remove(&key) {
            Some(tracker) if tracker.started_at.is_some() => tracker,
            other => {
                if let Some(tracker) = other {
                    book.unfinished.insert(key, tracker);
                }
                return Err(StorageError::backend(format!(
                    "{account} {category}: finish without a claimed tracker"
                )));
            }
        };

        tracker.finished_at = Some(now);
        tracker.status = outcome.status;
        tracker.detail = outcome.detail;

        book.states.insert(
            key.clone(),
            CategoryState {
                status: outcome.status,
                cache_expiry: outcome.cache_expiry,
            },
        );
        book.unfinished.insert(
            key.clone(),
            TrackerRecord::scheduled(account, category, outcome.next_scheduled_at),
        );
        book.finished.entry(key).or_default().push(tracker.clone());

        if tracker.status == SyncStatus::SyncError {
            log::warn!(
                "[TRACKER] {account} {category}: SYNC_ERROR ({}), next attempt at {}",
                tracker.detail.as_deref().unwrap_or("-"),
                outcome.next_scheduled_at
            );
        } else {
            log::info!(
                "[TRACKER] {account} {category}: {:?}, next attempt at {}",
                tracker.status,
                outcome.next_scheduled_at
            );
        }
        Ok(tracker)
    }

    fn reschedule(&self, account: AccountId, category: &str, at: Timestamp) -> StorageResult<()> {
        let mut book = self.lock()?;
        book.unfinished
            .entry(slot(account, category))
            .or_insert_with(|| TrackerRecord::scheduled(account, category, at))
            .scheduled_at = at;
        Ok(())
    }

    fn unfinished(
        &self,
        account: AccountId,
        category: &str,
    ) -> StorageResult<Option<TrackerRecord>> {
        Ok(self.lock()?.unfinished.get(&slot(account, category)).cloned())
    }

    fn category_state(
        &self,
        account: AccountId,
        category: &str,
    ) -> StorageResult<Option<CategoryState>> {
        Ok(self.lock()?.states.get(&slot(account, category)).cloned())
    }

    fn history(&self, account: AccountId, category: &str) -> StorageResult<Vec<TrackerRecord>> {
        Ok(self
            .lock()?
            .finished
            .get(&slot(account, category))
            .cloned()
            .unwrap_or_default())
    }
}
