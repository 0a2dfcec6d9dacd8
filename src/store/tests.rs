use std::sync::Arc;
use std::thread;

use crate::error::StorageError;
use crate::store::{all_rows, ChangeSet, MemoryStore, TemporalStore, Version};
use crate::types::{AccountId, OPEN};

const ACCOUNT: AccountId = AccountId(1);

fn store() -> MemoryStore<u64, String> {
    MemoryStore::new()
}

/// Asserts consecutive versions share boundaries and only the last may be open.
fn assert_contiguous(history: &[Version<u64, String>]) {
    for pair in history.windows(2) {
        assert_eq!(pair[0].life_end, pair[1].life_start, "gap or overlap in {history:?}");
        assert!(!pair[0].is_live());
    }
    for v in history {
        assert!(v.life_start <= v.life_end);
    }
}

#[test]
fn insert_creates_open_row() {
    let s = store();
    s.insert(ACCOUNT, 10, "ten".into(), 100).unwrap();

    let live = s.get_live(ACCOUNT, &10).unwrap().unwrap();
    assert_eq!(live.life_start, 100);
    assert_eq!(live.life_end, OPEN);
    assert_eq!(live.content, "ten");
}

#[test]
fn insert_over_live_row_fails() {
    let s = store();
    s.insert(ACCOUNT, 10, "ten".into(), 100).unwrap();

    let err = s.insert(ACCOUNT, 10, "again".into(), 200).unwrap_err();
    assert!(matches!(err, StorageError::LiveVersionExists { .. }));
    assert_eq!(s.history(ACCOUNT, &10).unwrap().len(), 1);
}

#[test]
fn evolve_seals_and_reopens_at_same_instant() {
    let s = store();
    s.insert(ACCOUNT, 1, "a".into(), 100).unwrap();
    s.evolve(ACCOUNT, 1, "b".into(), 250).unwrap();

    let history = s.history(ACCOUNT, &1).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].life_end, 250);
    assert_eq!(history[1].life_start, 250);
    assert!(history[1].is_live());
    assert_contiguous(&history);
}

#[test]
fn evolve_without_live_row_inserts() {
    let s = store();
    s.evolve(ACCOUNT, 3, "fresh".into(), 100).unwrap();

    let history = s.history(ACCOUNT, &3).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_live());
}

#[test]
fn expire_requires_live_row() {
    let s = store();
    let err = s.expire(ACCOUNT, 9, 100).unwrap_err();
    assert!(matches!(err, StorageError::NoLiveVersion { .. }));
}

#[test]
fn transitions_before_live_start_are_rejected() {
    let s = store();
    s.insert(ACCOUNT, 1, "a".into(), 500).unwrap();

    let err = s.evolve(ACCOUNT, 1, "b".into(), 400).unwrap_err();
    assert!(matches!(err, StorageError::StaleTimestamp { .. }));
    let err = s.expire(ACCOUNT, 1, 400).unwrap_err();
    assert!(matches!(err, StorageError::StaleTimestamp { .. }));
}

#[test]
fn as_of_queries_follow_interval_coverage() {
    let s = store();
    s.insert(ACCOUNT, 1, "a".into(), 100).unwrap();
    s.evolve(ACCOUNT, 1, "b".into(), 200).unwrap();
    s.expire(ACCOUNT, 1, 300).unwrap();

    assert!(s.get_as_of(ACCOUNT, &1, 99).unwrap().is_none());
    assert_eq!(s.get_as_of(ACCOUNT, &1, 100).unwrap().unwrap().content, "a");
    assert_eq!(s.get_as_of(ACCOUNT, &1, 199).unwrap().unwrap().content, "a");
    assert_eq!(s.get_as_of(ACCOUNT, &1, 200).unwrap().unwrap().content, "b");
    assert_eq!(s.get_as_of(ACCOUNT, &1, 299).unwrap().unwrap().content, "b");
    assert!(s.get_as_of(ACCOUNT, &1, 300).unwrap().is_none());
    assert!(s.get_live(ACCOUNT, &1).unwrap().is_none());

    assert_contiguous(&s.history(ACCOUNT, &1).unwrap());
}

#[test]
fn reinsert_after_expire_starts_new_lineage() {
    let s = store();
    s.insert(ACCOUNT, 1, "a".into(), 100).unwrap();
    s.expire(ACCOUNT, 1, 200).unwrap();
    s.insert(ACCOUNT, 1, "back".into(), 400).unwrap();

    assert!(s.get_as_of(ACCOUNT, &1, 300).unwrap().is_none());
    assert_eq!(s.get_as_of(ACCOUNT, &1, 400).unwrap().unwrap().content, "back");
    assert_eq!(s.history(ACCOUNT, &1).unwrap().len(), 2);
}

#[test]
fn reinsert_before_last_seal_is_rejected() {
    let s = store();
    s.insert(ACCOUNT, 1, "a".into(), 100).unwrap();
    s.expire(ACCOUNT, 1, 200).unwrap();

    let err = s.insert(ACCOUNT, 1, "b".into(), 150).unwrap_err();
    assert!(matches!(err, StorageError::StaleTimestamp { boundary: 200, now: 150, .. }));
    let err = s.evolve(ACCOUNT, 1, "b".into(), 150).unwrap_err();
    assert!(matches!(err, StorageError::StaleTimestamp { boundary: 200, .. }));

    assert_eq!(s.get_as_of(ACCOUNT, &1, 175).unwrap().unwrap().content, "a");
    assert_eq!(s.history(ACCOUNT, &1).unwrap().len(), 1);

    // Reopening exactly at the seal keeps the history contiguous.
    s.insert(ACCOUNT, 1, "b".into(), 200).unwrap();
    assert_contiguous(&s.history(ACCOUNT, &1).unwrap());
}

#[test]
fn invalid_change_set_applies_nothing() {
    let s = store();
    s.insert(ACCOUNT, 1, "a".into(), 100).unwrap();

    let changes = ChangeSet {
        inserts: vec![(2, "two".to_string()), (1, "dup".to_string())],
        evolves: Vec::new(),
        expires: Vec::new(),
    };
    assert!(s.apply(ACCOUNT, changes, 200).is_err());

    assert!(s.get_live(ACCOUNT, &2).unwrap().is_none());
    assert_eq!(s.row_count(ACCOUNT).unwrap(), 1);
}

#[test]
fn repeated_key_in_change_set_is_rejected() {
    let s = store();
    let changes = ChangeSet {
        inserts: vec![(5, "x".to_string())],
        evolves: vec![(5, "y".to_string())],
        expires: Vec::new(),
    };
    let err = s.apply(ACCOUNT, changes, 100).unwrap_err();
    assert!(matches!(err, StorageError::Backend { .. }));
    assert_eq!(s.row_count(ACCOUNT).unwrap(), 0);
}

#[test]
fn list_as_of_pages_in_key_order() {
    let s = store();
    for key in 1..=7u64 {
        s.insert(ACCOUNT, key, format!("v{key}"), 100).unwrap();
    }

    let first = s.list_as_of(ACCOUNT, 100, &all_rows::<u64, String>, 3, None).unwrap();
    assert_eq!(first.items.iter().map(|v| v.key).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(first.next, Some(3));

    let second = s
        .list_as_of(ACCOUNT, 100, &all_rows::<u64, String>, 3, first.next.as_ref())
        .unwrap();
    assert_eq!(second.items.iter().map(|v| v.key).collect::<Vec<_>>(), vec![4, 5, 6]);

    let third = s
        .list_as_of(ACCOUNT, 100, &all_rows::<u64, String>, 3, second.next.as_ref())
        .unwrap();
    assert_eq!(third.items.iter().map(|v| v.key).collect::<Vec<_>>(), vec![7]);
    assert!(third.next.is_none());
}

#[test]
fn exact_page_boundary_has_no_continuation() {
    let s = store();
    for key in 1..=4u64 {
        s.insert(ACCOUNT, key, "x".into(), 100).unwrap();
    }
    let page = s.list_as_of(ACCOUNT, 100, &all_rows::<u64, String>, 4, None).unwrap();
    assert_eq!(page.items.len(), 4);
    assert!(page.next.is_none());
}

#[test]
fn list_as_of_sees_past_state_and_filters() {
    let s = store();
    s.insert(ACCOUNT, 1, "keep".into(), 100).unwrap();
    s.insert(ACCOUNT, 2, "drop".into(), 100).unwrap();
    s.insert(ACCOUNT, 3, "keep".into(), 100).unwrap();
    s.expire(ACCOUNT, 3, 200).unwrap();

    let keep = |v: &Version<u64, String>| v.content == "keep";
    let past = s.list_all_as_of(ACCOUNT, 150, &keep, 1).unwrap();
    assert_eq!(past.iter().map(|v| v.key).collect::<Vec<_>>(), vec![1, 3]);

    let now = s.list_all_as_of(ACCOUNT, 250, &keep, 10).unwrap();
    assert_eq!(now.iter().map(|v| v.key).collect::<Vec<_>>(), vec![1]);
}

#[test]
fn accounts_are_isolated() {
    let s = store();
    s.insert(AccountId(1), 1, "one".into(), 100).unwrap();
    s.insert(AccountId(2), 1, "other".into(), 100).unwrap();

    assert_eq!(s.get_live(AccountId(1), &1).unwrap().unwrap().content, "one");
    assert_eq!(s.get_live(AccountId(2), &1).unwrap().unwrap().content, "other");
    assert!(s.live_set(AccountId(3)).unwrap().is_empty());
}

#[test]
fn concurrent_writers_on_different_accounts() {
    let s = Arc::new(store());
    let handles: Vec<_> = (0..8u64)
        .map(|n| {
            let s = Arc::clone(&s);
            thread::spawn(move || {
                let account = AccountId(n);
                for key in 0..50u64 {
                    s.insert(account, key, format!("{n}-{key}"), 100).unwrap();
                    s.evolve(account, key, format!("{n}-{key}'"), 200).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for n in 0..8u64 {
        let live = s.live_set(AccountId(n)).unwrap();
        assert_eq!(live.len(), 50);
        assert_eq!(s.row_count(AccountId(n)).unwrap(), 100);
    }
}
