//! Error types for teletype-linker

use thiserror::Error;

use crate::domain::locator::LocatorError;
use crate::domain::locking::{LockError, UnlockError};
use crate::host::HostError;

/// Result type alias using the linker's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error taxonomy
///
/// Session operations report failures as events and never surface these to
/// the plugin host. They show up at the Lock Store primitives, the locator
/// parser and the CLI boundary.
#[derive(Error, Debug)]
pub enum Error {
    // Lock errors (E300-E399)
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Unlock(#[from] UnlockError),

    // Locator errors (E400-E499)
    #[error(transparent)]
    Locator(#[from] LocatorError),

    // Host errors (E500-E599)
    #[error(transparent)]
    Host(#[from] HostError),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lock(e) => e.code(),
            Self::Unlock(e) => e.code(),
            Self::Locator(e) => e.code(),
            Self::Host(_) => "E500",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Lock(LockError::AlreadyLocked { lock_path, .. }) => Some(format!(
                "Join the session recorded in {} instead",
                lock_path.display()
            )),
            Self::Unlock(UnlockError::NotLocked { .. }) => {
                Some("teletype-linker status <file>".to_string())
            }
            Self::Unlock(UnlockError::NotTracked { .. }) => {
                Some("teletype-linker unlock <file> removes it regardless".to_string())
            }
            _ => None,
        }
    }
}
