use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use crate::error::{StorageError, StorageResult};
use crate::store::{ChangeSet, Page, RowFilter, TemporalStore, Version};
use crate::types::{AccountId, Timestamp, OPEN};

/// A sealed or live row without its owning account and key.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Row<C> {
    pub content: C,
    pub life_start: Timestamp,
    pub life_end: Timestamp,
}

/// key -> versions ordered by `life_start`; only the last one may be live.
pub(crate) type Rows<K, C> = BTreeMap<K, Vec<Row<C>>>;

type Shard<K, C> = Arc<RwLock<Rows<K, C>>>;

/// In-process [`TemporalStore`] for a single category.
///
/// Rows are sharded per account: writers on different accounts never wait on
/// each other, and each shard is guarded by its own `RwLock` so a change set
/// becomes visible to readers all at once.
pub struct MemoryStore<K, C> {
    pub(crate) accounts: RwLock<HashMap<AccountId, Shard<K, C>>>,
}

impl<K, C> Default for MemoryStore<K, C> {
    fn default() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, C> MemoryStore<K, C>
where
    K: Ord + Clone + Debug + Send + Sync,
    C: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored rows (live and sealed) for an account.
    pub fn row_count(&self, account: AccountId) -> StorageResult<usize> {
        let Some(shard) = self.shard(account)? else {
            return Ok(0);
        };
        let rows = shard.read().map_err(|_| poisoned())?;
        Ok(rows.values().map(Vec::len).sum())
    }

    fn shard(&self, account: AccountId) -> StorageResult<Option<Shard<K, C>>> {
        let accounts = self.accounts.read().map_err(|_| poisoned())?;
        Ok(accounts.get(&account).cloned())
    }

    fn shard_or_create(&self, account: AccountId) -> StorageResult<Shard<K, C>> {
        if let Some(shard) = self.shard(account)? {
            return Ok(shard);
        }
        let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
        Ok(accounts.entry(account).or_default().clone())
    }
}

fn poisoned() -> StorageError {
    StorageError::Poisoned { what: "store" }
}

fn live_row<C>(versions: &[Row<C>]) -> Option<&Row<C>> {
    versions.last().filter(|row| row.life_end == OPEN)
}

fn version_of<K: Clone, C: Clone>(account: AccountId, key: &K, row: &Row<C>) -> Version<K, C> {
    Version {
        account,
        key: key.clone(),
        content: row.content.clone(),
        life_start: row.life_start,
        life_end: row.life_end,
    }
}

/// Checks every mutation of `changes` against the current rows without
/// touching them.
fn validate<K, C>(
    account: AccountId,
    rows: &Rows<K, C>,
    changes: &ChangeSet<K, C>,
    now: Timestamp,
) -> StorageResult<()>
where
    K: Ord + Debug,
{
    let mut touched = BTreeSet::new();
    let keys = changes
        .inserts
        .iter()
        .map(|(k, _)| k)
        .chain(changes.evolves.iter().map(|(k, _)| k))
        .chain(changes.expires.iter());
    for key in keys {
        if !touched.insert(key) {
            return Err(StorageError::backend(format!(
                "{account}: key {key:?} appears twice in one change set"
            )));
        }
    }

    let live = |key: &K| rows.get(key).and_then(|versions| live_row(versions));
    let stale = |key: &K, boundary: Timestamp| StorageError::StaleTimestamp {
        account,
        key: format!("{key:?}"),
        boundary,
        now,
    };
    // A new row may not open before the key's last seal.
    let check_reopen = |key: &K| match rows.get(key).and_then(|versions| versions.last()) {
        Some(last) if now < last.life_end => Err(stale(key, last.life_end)),
        _ => Ok(()),
    };
    let check_order = |key: &K, row: &Row<C>| {
        if now < row.life_start {
            Err(stale(key, row.life_start))
        } else {
            Ok(())
        }
    };

    for (key, _) in &changes.inserts {
        if live(key).is_some() {
            return Err(StorageError::LiveVersionExists {
                account,
                key: format!("{key:?}"),
            });
        }
        check_reopen(key)?;
    }
    for (key, _) in &changes.evolves {
        match live(key) {
            Some(row) => check_order(key, row)?,
            None => check_reopen(key)?,
        }
    }
    for key in &changes.expires {
        match live(key) {
            Some(row) => check_order(key, row)?,
            None => {
                return Err(StorageError::NoLiveVersion {
                    account,
                    key: format!("{key:?}"),
                })
            }
        }
    }
    Ok(())
}

fn seal<K: Ord, C>(rows: &mut Rows<K, C>, key: &K, now: Timestamp) -> bool {
    match rows.get_mut(key).and_then(|versions| versions.last_mut()) {
        Some(row) if row.life_end == OPEN => {
            row.life_end = now;
            true
        }
        _ => false,
    }
}

fn open<K: Ord, C>(rows: &mut Rows<K, C>, key: K, content: C, now: Timestamp) {
    rows.entry(key).or_default().push(Row {
        content,
        life_start: now,
        life_end: OPEN,
    });
}

impl<K, C> TemporalStore<K, C> for MemoryStore<K, C>
where
    K: Ord + Clone + Debug + Send + Sync,
    C: Clone + Send + Sync,
{
    fn get_live(&self, account: AccountId, key: &K) -> StorageResult<Option<Version<K, C>>> {
        let Some(shard) = self.shard(account)? else {
            return Ok(None);
        };
        let rows = shard.read().map_err(|_| poisoned())?;
        Ok(rows
            .get(key)
            .and_then(|versions| live_row(versions))
            .map(|row| version_of(account, key, row)))
    }

    fn get_as_of(
        &self,
        account: AccountId,
        key: &K,
        at: Timestamp,
    ) -> StorageResult<Option<Version<K, C>>> {
        let Some(shard) = self.shard(account)? else {
            return Ok(None);
        };
        let rows = shard.read().map_err(|_| poisoned())?;
        Ok(rows.get(key).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|row| row.life_start <= at && at < row.life_end)
                .map(|row| version_of(account, key, row))
        }))
    }

    fn list_as_of(
        &self,
        account: AccountId,
        at: Timestamp,
        filter: RowFilter<'_, K, C>,
        page_size: usize,
        after: Option<&K>,
    ) -> StorageResult<Page<K, C>> {
        let page_size = page_size.max(1);
        let Some(shard) = self.shard(account)? else {
            return Ok(Page {
                items: Vec::new(),
                next: None,
            });
        };
        let rows = shard.read().map_err(|_| poisoned())?;
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };

        let mut items = Vec::with_capacity(page_size);
        let mut more = false;
        for (key, versions) in rows.range::<K, _>((lower, Bound::Unbounded)) {
            let Some(row) = versions
                .iter()
                .rev()
                .find(|row| row.life_start <= at && at < row.life_end)
            else {
                continue;
            };
            let version = version_of(account, key, row);
            if !filter(&version) {
                continue;
            }
            if items.len() == page_size {
                more = true;
                break;
            }
            items.push(version);
        }

        let next = if more {
            items.last().map(|v: &Version<K, C>| v.key.clone())
        } else {
            None
        };
        Ok(Page { items, next })
    }

    fn live_set(&self, account: AccountId) -> StorageResult<Vec<Version<K, C>>> {
        let Some(shard) = self.shard(account)? else {
            return Ok(Vec::new());
        };
        let rows = shard.read().map_err(|_| poisoned())?;
        Ok(rows
            .iter()
            .filter_map(|(key, versions)| {
                live_row(versions).map(|row| version_of(account, key, row))
            })
            .collect())
    }

    fn history(&self, account: AccountId, key: &K) -> StorageResult<Vec<Version<K, C>>> {
        let Some(shard) = self.shard(account)? else {
            return Ok(Vec::new());
        };
        let rows = shard.read().map_err(|_| poisoned())?;
        Ok(rows
            .get(key)
            .map(|versions| {
                versions
                    .iter()
                    .map(|row| version_of(account, key, row))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn apply(
        &self,
        account: AccountId,
        changes: ChangeSet<K, C>,
        now: Timestamp,
    ) -> StorageResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let shard = self.shard_or_create(account)?;
        let mut rows = shard.write().map_err(|_| poisoned())?;

        validate(account, &rows, &changes, now)?;

        let ChangeSet {
            inserts,
            evolves,
            expires,
        } = changes;

        for key in expires {
            log::trace!("[STORE] {account} expire {key:?} at {now}");
            seal(&mut rows, &key, now);
        }
        for (key, content) in evolves {
            log::trace!("[STORE] {account} evolve {key:?} at {now}");
            seal(&mut rows, &key, now);
            open(&mut rows, key, content, now);
        }
        for (key, content) in inserts {
            log::trace!("[STORE] {account} insert {key:?} at {now}");
            open(&mut rows, key, content, now);
        }
        Ok(())
    }
}
