//! Reconciliation engine.
//!
//! Turns a fetched [`Snapshot`] and the stored live state of one account into
//! a [`ChangeSet`](crate::store::ChangeSet) and applies it with a single
//! timestamp. Planning lives in `logic` and touches no storage; this module
//! only gathers the live state, asks the planner and hands the result to the
//! store.

pub mod hierarchy;
mod logic;
pub mod types;


pub use hierarchy::{
    assemble, contain, flatten, rebuild, Assembled, Children, Contained, ContainerRef, Tree,
};
pub use logic::{plan_append, plan_full, Plan};
pub use types::{ChangePolicy, ReconcileMode, ReconcileReport, Rules, Snapshot};

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::StorageResult;
use crate::store::TemporalStore;
use crate::types::AccountId;

pub struct Reconciler<K, C>
where
    K: Ord + Clone + Debug + Send + Sync,
    C: Clone + Send + Sync,
{
    store: Arc<dyn TemporalStore<K, C>>,
    clock: Arc<dyn Clock>,
}

impl<K, C> Reconciler<K, C>
where
    K: Ord + Clone + Debug + Send + Sync,
    C: Clone + Send + Sync,
{
    pub fn new(store: Arc<dyn TemporalStore<K, C>>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn TemporalStore<K, C>> {
        &self.store
    }

    /// Runs one reconciliation pass for `account`.
    pub fn reconcile(
        &self,
        account: AccountId,
        snapshot: Snapshot<K, C>,
        rules: &Rules<C>,
    ) -> StorageResult<ReconcileReport> {
        let now = self.clock.now();
        let (fetched, _) = snapshot.into_parts();
        let fetched_len = fetched.len();

        let plan = match rules.mode {
            ReconcileMode::AppendOnly => {
                let mut live_keys = BTreeSet::new();
                for key in fetched.keys() {
                    if self.store.get_live(account, key)?.is_some() {
                        live_keys.insert(key.clone());
                    }
                }
                plan_append(fetched, &live_keys)
            }
            ReconcileMode::Full | ReconcileMode::Hierarchical => {
                let live = self.store.live_set(account)?;
                plan_full(fetched, live, rules)
            }
        };

        let report = ReconcileReport {
            at: now,
            inserted: plan.changes.inserts.len(),
            evolved: plan.changes.evolves.len(),
            expired: plan.changes.expires.len(),
            unchanged: plan.unchanged,
        };

        log::debug!(
            "[RECONCILE] {account} {:?}: fetched={} insert={} evolve={} expire={} unchanged={}",
            rules.mode,
            fetched_len,
            report.inserted,
            report.evolved,
            report.expired,
            report.unchanged
        );

        self.store.apply(account, plan.changes, now)?;
        Ok(report)
    }
}
