use std::sync::Arc;
use std::thread;

use crate::config::SyncConfig;
use crate::tracker::logic::{
    decide, next_after_fatal, next_after_success, next_after_transient, Decision,
};
use crate::tracker::{
    CategoryState, Claim, MemoryTrackerStore, Outcome, SyncStatus, TrackerRecord, TrackerStore,
};
use crate::types::AccountId;

const ACCOUNT: AccountId = AccountId(9);
const JOURNAL: &str = "wallet_journal";

fn success(next: i64) -> Outcome {
    Outcome {
        status: SyncStatus::Updated,
        detail: None,
        next_scheduled_at: next,
        cache_expiry: next,
    }
}

// =========================================================================
// Decision rules
// =========================================================================

#[test]
fn first_attempt_runs() {
    assert_eq!(decide(None, None, 100), Decision::Run);
}

#[test]
fn future_schedule_is_not_due() {
    let tracker = TrackerRecord::scheduled(ACCOUNT, JOURNAL, 200);
    assert_eq!(decide(Some(&tracker), None, 100), Decision::NotDue);
    assert_eq!(decide(Some(&tracker), None, 200), Decision::Run);
}

#[test]
fn valid_cache_after_success_skips() {
    let tracker = TrackerRecord::scheduled(ACCOUNT, JOURNAL, 0);
    let cached = CategoryState {
        status: SyncStatus::Warning,
        cache_expiry: 500,
    };
    assert_eq!(decide(Some(&tracker), Some(&cached), 100), Decision::CacheValid);
    assert_eq!(decide(Some(&tracker), Some(&cached), 500), Decision::Run);
}

#[test]
fn cache_expiry_is_ignored_after_error() {
    let tracker = TrackerRecord::scheduled(ACCOUNT, JOURNAL, 0);
    let failed = CategoryState {
        status: SyncStatus::SyncError,
        cache_expiry: 500,
    };
    assert_eq!(decide(Some(&tracker), Some(&failed), 100), Decision::Run);
}

#[test]
fn scheduling_helpers() {
    let config = SyncConfig {
        fallback_interval_ms: 1_000,
        error_backoff_ms: 100,
        ..SyncConfig::default()
    };
    assert_eq!(next_after_success(50, Some(600), &config), 600);
    assert_eq!(next_after_success(50, Some(10), &config), 1_050);
    assert_eq!(next_after_success(50, None, &config), 1_050);
    assert_eq!(next_after_transient(50, Some(70), &config), 70);
    assert_eq!(next_after_transient(50, None, &config), 150);
    assert_eq!(next_after_fatal(50, &config), 1_050);
}

// =========================================================================
// Store
// =========================================================================

#[test]
fn claim_then_finish_schedules_next_attempt() {
    let trackers = MemoryTrackerStore::new();

    let claim = trackers.claim(ACCOUNT, JOURNAL, 100).unwrap();
    let Claim::Claimed(tracker) = claim else {
        panic!("expected claim, got {claim:?}");
    };
    assert_eq!(tracker.started_at, Some(100));
    assert_eq!(tracker.status, SyncStatus::NotProcessed);

    let finished = trackers.finish(ACCOUNT, JOURNAL, success(700), 150).unwrap();
    assert_eq!(finished.status, SyncStatus::Updated);
    assert_eq!(finished.finished_at, Some(150));
    assert!(finished.detail.is_none());

    let next = trackers.unfinished(ACCOUNT, JOURNAL).unwrap().unwrap();
    assert_eq!(next.scheduled_at, 700);
    assert_eq!(next.status, SyncStatus::NotProcessed);
    assert!(next.started_at.is_none());

    assert_eq!(trackers.history(ACCOUNT, JOURNAL).unwrap().len(), 1);
    assert_eq!(
        trackers.category_state(ACCOUNT, JOURNAL).unwrap().unwrap().status,
        SyncStatus::Updated
    );
}

#[test]
fn second_claim_while_running_is_refused() {
    let trackers = MemoryTrackerStore::new();
    assert!(matches!(trackers.claim(ACCOUNT, JOURNAL, 100).unwrap(), Claim::Claimed(_)));
    assert_eq!(
        trackers.claim(ACCOUNT, JOURNAL, 101).unwrap(),
        Claim::AlreadyRunning { started_at: 100 }
    );
}

#[test]
fn release_restores_pre_run_state() {
    let trackers = MemoryTrackerStore::new();
    trackers.claim(ACCOUNT, JOURNAL, 100).unwrap();
    trackers.release(ACCOUNT, JOURNAL).unwrap();

    let tracker = trackers.unfinished(ACCOUNT, JOURNAL).unwrap().unwrap();
    assert!(tracker.started_at.is_none());
    assert!(trackers.history(ACCOUNT, JOURNAL).unwrap().is_empty());
    assert!(matches!(trackers.claim(ACCOUNT, JOURNAL, 101).unwrap(), Claim::Claimed(_)));
}

#[test]
fn finish_requires_claim() {
    let trackers = MemoryTrackerStore::new();
    assert!(trackers.finish(ACCOUNT, JOURNAL, success(10), 5).is_err());

    trackers.reschedule(ACCOUNT, JOURNAL, 0).unwrap();
    assert!(trackers.finish(ACCOUNT, JOURNAL, success(10), 5).is_err());
    assert!(trackers.unfinished(ACCOUNT, JOURNAL).unwrap().is_some());
}

#[test]
fn cache_validity_survives_reschedule() {
    let trackers = MemoryTrackerStore::new();
    trackers.claim(ACCOUNT, JOURNAL, 0).unwrap();
    trackers.finish(ACCOUNT, JOURNAL, success(600_000), 0).unwrap();

    trackers.reschedule(ACCOUNT, JOURNAL, 0).unwrap();
    assert_eq!(
        trackers.claim(ACCOUNT, JOURNAL, 1_000).unwrap(),
        Claim::CacheValid {
            status: SyncStatus::Updated,
            cache_expiry: 600_000,
        }
    );
}

#[test]
fn categories_and_accounts_are_independent() {
    let trackers = MemoryTrackerStore::new();
    assert!(matches!(trackers.claim(ACCOUNT, JOURNAL, 1).unwrap(), Claim::Claimed(_)));
    assert!(matches!(trackers.claim(ACCOUNT, "assets", 1).unwrap(), Claim::Claimed(_)));
    assert!(matches!(trackers.claim(AccountId(10), JOURNAL, 1).unwrap(), Claim::Claimed(_)));
}

#[test]
fn concurrent_claims_admit_one_runner() {
    let trackers = Arc::new(MemoryTrackerStore::new());
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let trackers = Arc::clone(&trackers);
            thread::spawn(move || {
                matches!(trackers.claim(ACCOUNT, JOURNAL, 100).unwrap(), Claim::Claimed(_))
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn save_and_load_drop_claims() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trackers.json");

    let trackers = MemoryTrackerStore::new();
    trackers.claim(ACCOUNT, JOURNAL, 0).unwrap();
    trackers.finish(ACCOUNT, JOURNAL, success(50), 10).unwrap();
    trackers.claim(ACCOUNT, "assets", 20).unwrap();
    trackers.save(&path).unwrap();

    let loaded = MemoryTrackerStore::load(&path).unwrap();
    assert_eq!(loaded.history(ACCOUNT, JOURNAL).unwrap().len(), 1);
    assert_eq!(loaded.unfinished(ACCOUNT, JOURNAL).unwrap().unwrap().scheduled_at, 50);
    assert!(loaded.unfinished(ACCOUNT, "assets").unwrap().unwrap().started_at.is_none());
    assert_eq!(
        loaded.category_state(ACCOUNT, JOURNAL).unwrap(),
        trackers.category_state(ACCOUNT, JOURNAL).unwrap()
    );
}
