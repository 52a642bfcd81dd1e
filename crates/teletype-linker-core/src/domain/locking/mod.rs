//! File locking for collaborative sessions
//!
//! Locks are advisory sentinel files created next to the file being shared.
//! They only mean something to cooperating instances of this tool.
//!
//! # Architecture
//!
//! - **Lock Store**: `LockStore` creates and deletes `<file>.lock` atomically
//! - **Types**: `LockError`, `UnlockError`, `LockRecord`, `ReleaseReport`
//!
//! # Example
//!
//! ```ignore
//! use teletype_linker_core::domain::locking::{LockConfig, LockStore};
//!
//! let store = LockStore::new(LockConfig::default(), events.clone());
//!
//! // Lock the file for the session that shares it
//! store.acquire(Path::new("/srv/keynotes.txt"), &portal.delegate_uri).await?;
//!
//! // ...and give it back
//! store.release(Path::new("/srv/keynotes.txt")).await?;
//! ```

pub mod store;
pub mod types;

pub use store::LockStore;
pub use types::{LockConfig, LockError, LockRecord, LockResult, ReleaseReport, UnlockError};
