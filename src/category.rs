//! What makes one entity category different from another.
//!
//! The reconciliation loop is shared; a category only supplies its name,
//! how fetched items map to logical keys and content, how content is
//! compared, and which other categories must have synced first.

use std::fmt::Debug;

use crate::reconcile::{Rules, Snapshot};

pub trait SyncCategory: Send + Sync {
    /// Item as returned by the remote API.
    type Item: Send + Sync + 'static;
    type Key: Ord + Clone + Debug + Send + Sync + 'static;
    type Content: Clone + Send + Sync + 'static;

    /// Tracker name, unique per account.
    fn name(&self) -> &str;

    fn rules(&self) -> Rules<Self::Content>;

    /// Categories whose last finished status must be `UPDATED` before this
    /// one may contact the remote.
    fn prerequisites(&self) -> Vec<String> {
        Vec::new()
    }

    /// Extracts logical keys. Hierarchical categories also resolve
    /// containment here.
    fn snapshot(&self, items: Vec<Self::Item>) -> Snapshot<Self::Key, Self::Content>;
}
