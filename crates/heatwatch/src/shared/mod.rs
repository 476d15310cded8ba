//! Shared persistent key-value store used for cross-context signalling.

pub mod store;
pub mod watcher;

pub use store::{
    CrossContextRecord, SharedStore, StoreFile, EVENT_RETENTION, JOB_CANCELLED_KEY,
    JOB_COMPLETED_KEY,
};
pub use watcher::{AsyncStoreWatcher, StorageChange, StoreWatcher};
