use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::remote::api::{RemoteApi, RemoteError, RemotePage};
use crate::types::{AccountId, Cursor};

#[derive(Clone, Debug)]
enum Step<I> {
    Page(RemotePage<I>),
    Fail(RemoteError),
    /// Never resolves; used to exercise cancellation.
    Hang,
}

/// In-memory [`RemoteApi`] that replays a queue of pages and errors.
///
/// Clones share the queue and the call log, so a test can keep a handle after
/// moving one into a sync task.
pub struct ScriptedClient<I> {
    steps: Arc<Mutex<VecDeque<Step<I>>>>,
    calls: Arc<AtomicUsize>,
    cursors: Arc<Mutex<Vec<Option<Cursor>>>>,
}

impl<I> Clone for ScriptedClient<I> {
    fn clone(&self) -> Self {
        Self {
            steps: Arc::clone(&self.steps),
            calls: Arc::clone(&self.calls),
            cursors: Arc::clone(&self.cursors),
        }
    }
}

impl<I> Default for ScriptedClient<I> {
    fn default() -> Self {
        Self {
            steps: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            cursors: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<I> ScriptedClient<I> {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, step: Step<I>) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(step);
        }
    }

    pub fn push_page(&self, page: RemotePage<I>) {
        self.push(Step::Page(page));
    }

    /// Queues a whole snapshot split into pages of `page_size`, chained by
    /// cursor. The last page carries `cache_expiry` as well as the first.
    pub fn push_snapshot(&self, items: Vec<I>, page_size: usize, cache_expiry: Option<i64>) {
        let page_size = page_size.max(1);
        let mut items = VecDeque::from(items);
        let mut index = 0i64;
        loop {
            let chunk: Vec<I> = (0..page_size).filter_map(|_| items.pop_front()).collect();
            index += 1;
            let next = if items.is_empty() { None } else { Some(Cursor(index)) };
            self.push_page(RemotePage {
                items: chunk,
                cache_expiry,
                next,
            });
            if next.is_none() {
                break;
            }
        }
    }

    pub fn push_error(&self, error: RemoteError) {
        self.push(Step::Fail(error));
    }

    pub fn push_hang(&self) {
        self.push(Step::Hang);
    }

    /// Number of `fetch` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Cursors passed to `fetch`, in call order.
    pub fn cursors(&self) -> Vec<Option<Cursor>> {
        self.cursors.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl<I> RemoteApi<I> for ScriptedClient<I>
where
    I: Clone + Send + Sync + 'static,
{
    async fn fetch(
        &self,
        account: AccountId,
        cursor: Option<Cursor>,
    ) -> Result<RemotePage<I>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.push(cursor);
        }
        let step = self
            .steps
            .lock()
            .map_err(|_| RemoteError::transient("scripted client poisoned"))?
            .pop_front();
        log::trace!("[REMOTE] {account} fetch cursor={cursor:?}");
        match step {
            Some(Step::Page(page)) => Ok(page),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(RemoteError::transient("no scripted response left")),
        }
    }
}
