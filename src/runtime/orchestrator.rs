use std::sync::Arc;

use serde::Serialize;

use crate::category::SyncCategory;
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::remote::RemoteApi;
use crate::runtime::paging::{fetch_pages, FetchFailure};
use crate::store::TemporalStore;
use crate::tracker::logic::{
    next_after_fatal, next_after_success, next_after_transient, next_after_unmet_prerequisite,
};
use crate::tracker::{Claim, Outcome, SyncStatus, TrackerRecord, TrackerStore};
use crate::types::{AccountId, Timestamp};

/// Whether the attempt actually ran.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Ran,
    NotDue { scheduled_at: Timestamp },
    CacheValid { cache_expiry: Timestamp },
    AlreadyRunning { started_at: Timestamp },
}

/// Result of one [`SyncTask::run`]. Skipped runs carry the prior outcome.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncReport {
    pub account: AccountId,
    pub category: String,
    pub disposition: Disposition,
    pub status: SyncStatus,
    pub detail: Option<String>,
    pub fetched: usize,
    pub reconcile: Option<ReconcileReport>,
    pub next_scheduled_at: Option<Timestamp>,
}

impl SyncReport {
    pub fn ran(&self) -> bool {
        self.disposition == Disposition::Ran
    }
}

/// **SyncTask**
///
/// The imperative shell around one category. A run:
/// 1. Claims the unfinished tracker (or returns the prior outcome).
/// 2. Checks prerequisites without contacting the remote.
/// 3. Pages through the remote snapshot.
/// 4. Reconciles it into the temporal store under one timestamp.
/// 5. Finishes the tracker and schedules the next attempt.
///
/// Remote failures end up on the tracker. Only storage failures escape, and
/// they leave the tracker unclaimed so the next invocation retries.
pub struct SyncTask<S: SyncCategory> {
    category: S,
    remote: Arc<dyn RemoteApi<S::Item>>,
    reconciler: Reconciler<S::Key, S::Content>,
    trackers: Arc<dyn TrackerStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl<S: SyncCategory> SyncTask<S> {
    pub fn new(
        category: S,
        remote: Arc<dyn RemoteApi<S::Item>>,
        store: Arc<dyn TemporalStore<S::Key, S::Content>>,
        trackers: Arc<dyn TrackerStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            category,
            remote,
            reconciler: Reconciler::new(store, Arc::clone(&clock)),
            trackers,
            clock,
            config,
        }
    }

    pub fn category(&self) -> &S {
        &self.category
    }

    pub async fn run(&self, account: AccountId) -> Result<SyncReport, SyncError> {
        let name = self.category.name();
        let now = self.clock.now();

        let claim = self.trackers.claim(account, name, now)?;
        let Claim::Claimed(_) = claim else {
            return self.skipped(account, claim);
        };
        let guard = ClaimGuard::new(Arc::clone(&self.trackers), account, name);
        log::info!("[SYNC] {account} {name}: started");

        if let Some(missing) = self.unmet_prerequisite(account)? {
            let outcome = Outcome {
                status: SyncStatus::SyncError,
                detail: Some(format!("prerequisite {missing} has not been updated")),
                next_scheduled_at: next_after_unmet_prerequisite(now, &self.config),
                cache_expiry: now,
            };
            return self.finish(guard, account, outcome, 0, None);
        }

        let rules = self.category.rules();
        let fetched = match fetch_pages(
            self.remote.as_ref(),
            account,
            rules.mode,
            self.config.max_download,
        )
        .await
        {
            Ok(fetched) => fetched,
            Err(failure) => {
                let failed_at = self.clock.now();
                let next_scheduled_at = match &failure {
                    FetchFailure::Remote(err) if err.is_transient() => {
                        next_after_transient(failed_at, err.retry_after(), &self.config)
                    }
                    _ => next_after_fatal(failed_at, &self.config),
                };
                let outcome = Outcome {
                    status: SyncStatus::SyncError,
                    detail: Some(failure.detail()),
                    next_scheduled_at,
                    cache_expiry: failed_at,
                };
                return self.finish(guard, account, outcome, 0, None);
            }
        };

        let count = fetched.items.len();
        let snapshot = self.category.snapshot(fetched.items);
        let anomalies = snapshot.anomalies().to_vec();
        for anomaly in &anomalies {
            log::warn!("[SYNC] {account} {name}: {anomaly}");
        }

        let report = self.reconciler.reconcile(account, snapshot, &rules)?;

        let done_at = self.clock.now();
        let (status, detail) = if anomalies.is_empty() {
            (SyncStatus::Updated, None)
        } else {
            (SyncStatus::Warning, Some(anomalies.join("; ")))
        };
        let outcome = Outcome {
            status,
            detail,
            next_scheduled_at: next_after_success(done_at, fetched.cache_expiry, &self.config),
            cache_expiry: fetched.cache_expiry.unwrap_or(done_at),
        };
        self.finish(guard, account, outcome, count, Some(report))
    }

    fn unmet_prerequisite(&self, account: AccountId) -> Result<Option<String>, SyncError> {
        for prerequisite in self.category.prerequisites() {
            let state = self.trackers.category_state(account, &prerequisite)?;
            if state.map(|s| s.status) != Some(SyncStatus::Updated) {
                return Ok(Some(prerequisite));
            }
        }
        Ok(None)
    }

    fn finish(
        &self,
        guard: ClaimGuard,
        account: AccountId,
        outcome: Outcome,
        fetched: usize,
        reconcile: Option<ReconcileReport>,
    ) -> Result<SyncReport, SyncError> {
        let next_scheduled_at = outcome.next_scheduled_at;
        let record = self
            .trackers
            .finish(account, self.category.name(), outcome, self.clock.now())?;
        guard.disarm();

        Ok(SyncReport {
            account,
            category: record.category,
            disposition: Disposition::Ran,
            status: record.status,
            detail: record.detail,
            fetched,
            reconcile,
            next_scheduled_at: Some(next_scheduled_at),
        })
    }

    fn skipped(&self, account: AccountId, claim: Claim) -> Result<SyncReport, SyncError> {
        let name = self.category.name();
        let disposition = match claim {
            Claim::NotDue { scheduled_at } => Disposition::NotDue { scheduled_at },
            Claim::CacheValid { cache_expiry, .. } => Disposition::CacheValid { cache_expiry },
            Claim::AlreadyRunning { started_at } => Disposition::AlreadyRunning { started_at },
            Claim::Claimed(_) => Disposition::Ran,
        };
        log::info!("[SYNC] {account} {name}: skipped ({disposition:?})");

        let status = self
            .trackers
            .category_state(account, name)?
            .map(|state| state.status)
            .unwrap_or(SyncStatus::NotProcessed);
        let last: Option<TrackerRecord> = self.trackers.history(account, name)?.pop();
        let next = self.trackers.unfinished(account, name)?;

        Ok(SyncReport {
            account,
            category: name.to_string(),
            disposition,
            status,
            detail: last.and_then(|record| record.detail),
            fetched: 0,
            reconcile: None,
            next_scheduled_at: next.map(|tracker| tracker.scheduled_at),
        })
    }
}

/// Returns the claimed tracker to its pre-run state unless the run finished.
/// Covers early returns on storage errors and a dropped (cancelled) future.
struct ClaimGuard {
    trackers: Arc<dyn TrackerStore>,
    account: AccountId,
    category: String,
    armed: bool,
}

impl ClaimGuard {
    fn new(trackers: Arc<dyn TrackerStore>, account: AccountId, category: &str) -> Self {
        Self {
            trackers,
            account,
            category: category.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::warn!(
            "[SYNC] {} {}: run abandoned, releasing claim",
            self.account,
            self.category
        );
        if let Err(err) = self.trackers.release(self.account, &self.category) {
            log::error!(
                "[SYNC] {} {}: failed to release claim: {err}",
                self.account,
                self.category
            );
        }
    }
}
