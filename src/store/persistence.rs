//! JSON snapshot persistence for [`MemoryStore`].

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::store::memory::{Row, Rows};
use crate::store::MemoryStore;
use crate::types::{AccountId, Timestamp};

#[derive(Serialize, Deserialize)]
struct PersistedRow<K, C> {
    account: AccountId,
    key: K,
    content: C,
    life_start: Timestamp,
    life_end: Timestamp,
}

impl<K, C> MemoryStore<K, C>
where
    K: Ord + Clone + Debug + Send + Sync + Serialize + DeserializeOwned,
    C: Clone + Send + Sync + Serialize + DeserializeOwned,
{
    /// Writes every row to `path` (via a sibling temp file and rename).
    pub fn save(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        let mut out = Vec::new();
        {
            let accounts = self
                .accounts
                .read()
                .map_err(|_| StorageError::Poisoned { what: "store" })?;
            for (account, shard) in accounts.iter() {
                let rows = shard
                    .read()
                    .map_err(|_| StorageError::Poisoned { what: "store" })?;
                for (key, versions) in rows.iter() {
                    for row in versions {
                        out.push(PersistedRow {
                            account: *account,
                            key: key.clone(),
                            content: row.content.clone(),
                            life_start: row.life_start,
                            life_end: row.life_end,
                        });
                    }
                }
            }
        }

        let payload = serde_json::to_vec_pretty(&out)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, path)?;
        log::debug!("[STORE] saved {} rows to {}", out.len(), path.display());
        Ok(())
    }

    /// Loads a store written by [`MemoryStore::save`]. A missing file yields an
    /// empty store.
    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("[STORE] {} not found, starting empty", path.display());
            return Ok(Self::new());
        }
        let raw = fs::read(path)?;
        let persisted: Vec<PersistedRow<K, C>> = serde_json::from_slice(&raw)?;
        let count = persisted.len();

        let mut accounts: HashMap<AccountId, Rows<K, C>> = HashMap::new();
        for row in persisted {
            accounts
                .entry(row.account)
                .or_default()
                .entry(row.key)
                .or_default()
                .push(Row {
                    content: row.content,
                    life_start: row.life_start,
                    life_end: row.life_end,
                });
        }
        for rows in accounts.values_mut() {
            for versions in rows.values_mut() {
                versions.sort_by_key(|row| row.life_start);
            }
        }

        log::info!("[STORE] loaded {count} rows from {}", path.display());
        Ok(Self {
            accounts: RwLock::new(
                accounts
                    .into_iter()
                    .map(|(account, rows)| (account, Arc::new(RwLock::new(rows))))
                    .collect(),
            ),
        })
    }
}
