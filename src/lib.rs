//! weavesync: keep a local file tree in sync with a permanent, append-only
//! ledger.
//!
//! The pipeline runs in four steps:
//! - [`scanner`] classifies local files and folders against the store.
//! - [`price`] quotes the pending queue.
//! - [`bundle`] (or individual transactions) wraps payloads and [`upload`]
//!   sends them in chunks.
//! - [`tracker`] polls confirmations and requeues anything that timed out.
//!
//! [`sync::SyncEngine`] drives all four. [`sharing`] builds web app links
//! for synced drives and files.

pub mod bundle;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod model;
pub mod payload;
pub mod price;
pub mod scanner;
pub mod sharing;
pub mod store;
pub mod sync;
pub mod tracker;
pub mod upload;

pub use config::SyncConfig;
pub use error::{Result, SyncError, UploadError};
pub use model::{Bundle, Drive, Entity, EntityKey, Privacy, SyncStatus};
pub use store::{FjallStore, MemoryStore, StoreQueries, SyncStore};
pub use sync::{SyncEngine, UploadCapabilities};
