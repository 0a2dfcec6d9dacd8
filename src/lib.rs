//! Bitemporal synchronization of remote entity categories.
//!
//! Remote snapshots are fetched page by page, reconciled into an
//! append-preserving temporal store and scheduled through a per-category
//! tracker.

pub mod category;
pub mod clock;
pub mod config;
pub mod error;
pub mod fixture;
pub mod reconcile;
pub mod remote;
pub mod runtime;
pub mod store;
pub mod tracker;
pub mod types;

pub use category::SyncCategory;
pub use error::{StorageError, SyncError};
pub use runtime::{SyncReport, SyncTask};
pub use types::{AccountId, Timestamp, OPEN};
