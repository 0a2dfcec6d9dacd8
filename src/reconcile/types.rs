use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// How a fetched batch relates to what is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Immutable events: unseen keys are inserted, nothing is ever expired.
    AppendOnly,
    /// The batch is the complete current state of a finite set.
    Full,
    /// Full reconciliation over flattened trees; the container reference is
    /// part of the compared content.
    Hierarchical,
}

impl ReconcileMode {
    /// Whether the fetched batch must be complete to be reconciled.
    pub fn is_authoritative(self) -> bool {
        !matches!(self, ReconcileMode::AppendOnly)
    }
}

/// What to do with a key whose fetched content equals the stored content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangePolicy {
    #[default]
    SkipUnchanged,
    /// Evolve on every successful fetch regardless of equality. Set per
    /// category, never globally.
    AlwaysEvolve,
}

/// Engine parameters for one category.
pub struct Rules<C> {
    pub mode: ReconcileMode,
    pub policy: ChangePolicy,
    pub same_content: fn(&C, &C) -> bool,
}

impl<C> Clone for Rules<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Rules<C> {}

impl<C> fmt::Debug for Rules<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rules")
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<C: PartialEq> Rules<C> {
    pub fn append_only() -> Self {
        Self::with_mode(ReconcileMode::AppendOnly)
    }

    pub fn full() -> Self {
        Self::with_mode(ReconcileMode::Full)
    }

    pub fn hierarchical() -> Self {
        Self::with_mode(ReconcileMode::Hierarchical)
    }

    fn with_mode(mode: ReconcileMode) -> Self {
        Self {
            mode,
            policy: ChangePolicy::SkipUnchanged,
            same_content: <C as PartialEq>::eq,
        }
    }
}

impl<C> Rules<C> {
    pub fn always_evolve(mut self) -> Self {
        self.policy = ChangePolicy::AlwaysEvolve;
        self
    }

    pub fn with_equality(mut self, same_content: fn(&C, &C) -> bool) -> Self {
        self.same_content = same_content;
        self
    }
}

/// A fetched batch keyed by logical key, plus anything odd noticed while
/// building it.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<K, C> {
    entries: BTreeMap<K, C>,
    anomalies: Vec<String>,
}

impl<K, C> Default for Snapshot<K, C> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            anomalies: Vec::new(),
        }
    }
}

impl<K: Ord + Debug, C> Snapshot<K, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. A repeated key keeps the first content and is recorded
    /// as an anomaly.
    pub fn push(&mut self, key: K, content: C) {
        match self.entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(content);
            }
            Entry::Occupied(slot) => {
                self.anomalies
                    .push(format!("duplicate key {:?} in snapshot", slot.key()));
            }
        }
    }

    pub fn note(&mut self, anomaly: impl Into<String>) {
        self.anomalies.push(anomaly.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&C> {
        self.entries.get(key)
    }

    pub fn anomalies(&self) -> &[String] {
        &self.anomalies
    }

    pub fn into_parts(self) -> (BTreeMap<K, C>, Vec<String>) {
        (self.entries, self.anomalies)
    }
}

impl<K: Ord + Debug, C> FromIterator<(K, C)> for Snapshot<K, C> {
    fn from_iter<I: IntoIterator<Item = (K, C)>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for (key, content) in iter {
            snapshot.push(key, content);
        }
        snapshot
    }
}

/// Counts for one reconciliation pass. Every mutation shares `at`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub at: Timestamp,
    pub inserted: usize,
    pub evolved: usize,
    pub expired: usize,
    pub unchanged: usize,
}

impl ReconcileReport {
    /// Rows created by the pass (inserts plus evolve successors).
    pub fn versions_created(&self) -> usize {
        self.inserted + self.evolved
    }

    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.evolved == 0 && self.expired == 0
    }
}
