use crate::config::SyncConfig;
use crate::tracker::state::{CategoryState, TrackerRecord};
use crate::types::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Run,
    NotDue,
    CacheValid,
    AlreadyRunning,
}

/// Whether an attempt may start now.
pub fn decide(
    unfinished: Option<&TrackerRecord>,
    state: Option<&CategoryState>,
    now: Timestamp,
) -> Decision {
    if let Some(tracker) = unfinished {
        if tracker.started_at.is_some() {
            return Decision::AlreadyRunning;
        }
        if tracker.scheduled_at > now {
            return Decision::NotDue;
        }
    }
    if let Some(state) = state {
        if state.status.is_success() && state.cache_expiry > now {
            return Decision::CacheValid;
        }
    }
    Decision::Run
}

/// Next run after success: the remote cache expiry when it lies in the
/// future, the fallback interval otherwise.
pub fn next_after_success(
    now: Timestamp,
    cache_expiry: Option<Timestamp>,
    config: &SyncConfig,
) -> Timestamp {
    match cache_expiry {
        Some(expiry) if expiry > now => expiry,
        _ => now + config.fallback_interval_ms,
    }
}

/// Next run after a transient error: the server's retry-after when given,
/// the short backoff otherwise.
pub fn next_after_transient(
    now: Timestamp,
    retry_after: Option<Timestamp>,
    config: &SyncConfig,
) -> Timestamp {
    match retry_after {
        Some(at) if at > now => at,
        _ => now + config.error_backoff_ms,
    }
}

/// Fatal errors keep the normal cadence.
pub fn next_after_fatal(now: Timestamp, config: &SyncConfig) -> Timestamp {
    now + config.fallback_interval_ms
}

pub fn next_after_unmet_prerequisite(now: Timestamp, config: &SyncConfig) -> Timestamp {
    now + config.error_backoff_ms
}
