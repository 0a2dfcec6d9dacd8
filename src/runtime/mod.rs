//! Synchronization tasks: the imperative shell that ties a category's remote
//! client, its temporal store and the tracker together.

mod orchestrator;
pub mod paging;


pub use orchestrator::{Disposition, SyncReport, SyncTask};
pub use paging::{fetch_pages, FetchFailure, Fetched};
