//! Teletype Linker Core Library
//!
//! This crate coordinates exclusive, file-level collaboration sessions on top
//! of the Teletype collaboration service:
//! - Session locators (`new` / `join` requests)
//! - Lock files guarding shared files
//! - Collaboration service readiness with bounded retries
//! - Share/join session coordination and editor tracking
//! - Notifications for the host editor
//! - Configuration

pub mod config;
pub mod domain;
pub mod error;
pub mod host;
pub mod notifier;
pub mod package;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::events::{EventBus, EventKind, LinkerEvent};
    pub use crate::domain::locator::{LinkerEndpoint, SessionLocator};
    pub use crate::domain::locking::{LockConfig, LockError, LockStore, UnlockError};
    pub use crate::domain::session::{DispatchOutcome, SessionCoordinator, ShareOutcome};
    pub use crate::error::{Error, Result};
    pub use crate::package::{HostServices, LinkerPackage, LinkerService};
}
