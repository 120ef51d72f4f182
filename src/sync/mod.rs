//! Sync engine: replays the write queue when connectivity allows.

mod types;
pub mod engine;

pub use engine::SyncEngine;
pub use types::{FailedItem, SyncResult, SyncState, SyncStatus};
