use std::collections::{BTreeMap, BTreeSet};

use crate::reconcile::types::{ChangePolicy, Rules};
use crate::store::{ChangeSet, Version};

/// A planned pass plus how many fetched keys needed nothing.
#[derive(Debug)]
pub struct Plan<K, C> {
    pub changes: ChangeSet<K, C>,
    pub unchanged: usize,
}

/// Append-only ingestion: every fetched key without a live version is
/// inserted, every other one is left alone.
pub fn plan_append<K: Ord, C>(fetched: BTreeMap<K, C>, live_keys: &BTreeSet<K>) -> Plan<K, C> {
    let mut changes = ChangeSet::default();
    let mut unchanged = 0;

    for (key, content) in fetched {
        if live_keys.contains(&key) {
            unchanged += 1;
        } else {
            changes.inserts.push((key, content));
        }
    }

    Plan { changes, unchanged }
}

/// Full reconciliation of an authoritative snapshot against the live set.
///
/// - live but not fetched: expire
/// - fetched and live, content differs (or policy says always): evolve
/// - fetched and live, same content: nothing
/// - fetched but not live: insert
pub fn plan_full<K: Ord, C>(
    fetched: BTreeMap<K, C>,
    live: Vec<Version<K, C>>,
    rules: &Rules<C>,
) -> Plan<K, C> {
    let mut changes = ChangeSet::default();
    let mut unchanged = 0;

    let mut live: BTreeMap<K, C> = live.into_iter().map(|v| (v.key, v.content)).collect();

    for (key, content) in fetched {
        match live.remove(&key) {
            None => changes.inserts.push((key, content)),
            Some(stored) => {
                let evolve = rules.policy == ChangePolicy::AlwaysEvolve
                    || !(rules.same_content)(&stored, &content);
                if evolve {
                    changes.evolves.push((key, content));
                } else {
                    unchanged += 1;
                }
            }
        }
    }

    // Whatever is left was not in the snapshot.
    changes.expires.extend(live.into_keys());

    Plan { changes, unchanged }
}
