use std::collections::HashSet;

use crate::reconcile::ReconcileMode;
use crate::remote::{RemoteApi, RemoteError};
use crate::types::{AccountId, Cursor, Timestamp};

/// Everything downloaded in one run.
#[derive(Debug)]
pub struct Fetched<I> {
    pub items: Vec<I>,
    /// Hint from the first page.
    pub cache_expiry: Option<Timestamp>,
    pub pages: usize,
    /// The download cap cut the snapshot short.
    pub truncated: bool,
}

#[derive(Debug)]
pub enum FetchFailure {
    Remote(RemoteError),
    /// An authoritative snapshot did not fit under the cap.
    OverCap { limit: usize },
    /// The remote handed back a cursor it had already served, so the rest of
    /// an authoritative snapshot cannot be reached.
    StalledCursor { cursor: Cursor },
}

impl FetchFailure {
    pub fn detail(&self) -> String {
        match self {
            FetchFailure::Remote(err) => err.to_string(),
            FetchFailure::OverCap { limit } => {
                format!("snapshot exceeds download cap of {limit} records")
            }
            FetchFailure::StalledCursor { cursor } => {
                format!("remote repeated continuation cursor {}", cursor.0)
            }
        }
    }
}

/// Follows continuation cursors until the remote is exhausted or the cap is
/// reached.
///
/// Append-only categories keep the first `max_download` records (the newest)
/// and stop. Other modes need the whole snapshot and fail once it grows past
/// the cap. Any remote error fails the whole fetch; nothing partial is
/// returned. A repeated cursor ends an append-only fetch early and fails an
/// authoritative one.
pub async fn fetch_pages<I: Send>(
    remote: &dyn RemoteApi<I>,
    account: AccountId,
    mode: ReconcileMode,
    max_download: usize,
) -> Result<Fetched<I>, FetchFailure> {
    let mut fetched = Fetched {
        items: Vec::new(),
        cache_expiry: None,
        pages: 0,
        truncated: false,
    };
    let mut cursor: Option<Cursor> = None;
    let mut served: HashSet<Cursor> = HashSet::new();

    loop {
        let page = remote
            .fetch(account, cursor)
            .await
            .map_err(FetchFailure::Remote)?;
        fetched.pages += 1;
        if fetched.pages == 1 {
            fetched.cache_expiry = page.cache_expiry;
        }
        if page.items.is_empty() {
            break;
        }
        fetched.items.extend(page.items);

        if mode.is_authoritative() {
            if fetched.items.len() > max_download {
                log::warn!(
                    "[PAGING] {account}: {:?} snapshot passed cap {max_download} after {} pages",
                    mode,
                    fetched.pages
                );
                return Err(FetchFailure::OverCap {
                    limit: max_download,
                });
            }
        } else if fetched.items.len() >= max_download {
            fetched.truncated = fetched.items.len() > max_download || page.next.is_some();
            fetched.items.truncate(max_download);
            if fetched.truncated {
                log::info!(
                    "[PAGING] {account}: cap {max_download} reached, keeping newest records"
                );
            }
            break;
        }

        match page.next {
            None => break,
            Some(next) if served.insert(next) => cursor = Some(next),
            Some(next) => {
                log::warn!(
                    "[PAGING] {account}: cursor {} repeated after {} pages",
                    next.0,
                    fetched.pages
                );
                if mode.is_authoritative() {
                    return Err(FetchFailure::StalledCursor { cursor: next });
                }
                fetched.truncated = true;
                break;
            }
        }
    }

    log::debug!(
        "[PAGING] {account}: {} records in {} pages",
        fetched.items.len(),
        fetched.pages
    );
    Ok(fetched)
}
