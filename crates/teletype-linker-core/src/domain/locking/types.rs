//! Lock types and error definitions

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::locator::LinkerEndpoint;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Failures creating a lock file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Exclusive create collided with an existing lock file
    #[error("'{}' is already locked ({} exists)", file.display(), lock_path.display())]
    AlreadyLocked { file: PathBuf, lock_path: PathBuf },

    #[error("Lock I/O error on '{}': {message}", lock_path.display())]
    IoFailure {
        lock_path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },
}

impl LockError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyLocked { .. } => "E301",
            Self::IoFailure { .. } => "E306",
        }
    }

    pub(crate) fn io(lock_path: PathBuf, err: &io::Error) -> Self {
        Self::IoFailure {
            lock_path,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Failures deleting a lock file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnlockError {
    /// There was no lock file to delete
    #[error("'{}' is not locked ({} does not exist)", file.display(), lock_path.display())]
    NotLocked { file: PathBuf, lock_path: PathBuf },

    /// This instance never locked the file; whatever is on disk is left alone
    #[error("'{}' is not locked by this session", file.display())]
    NotTracked { file: PathBuf },

    #[error("Unlock I/O error on '{}': {message}", lock_path.display())]
    IoFailure {
        lock_path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },
}

impl UnlockError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotLocked { .. } => "E302",
            Self::NotTracked { .. } => "E303",
            Self::IoFailure { .. } => "E307",
        }
    }
}

/// What a lock file on disk says
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// The locked file
    pub file: PathBuf,

    /// The sentinel next to it
    pub lock_path: PathBuf,

    /// Raw contents: the join locator for the session holding the file
    pub join_uri: String,

    /// Session locator recovered from `join_uri`, when it parses
    pub session_uri: Option<String>,

    /// When the lock file was last written
    pub locked_at: Option<DateTime<Utc>>,
}

/// Outcome of a best-effort sweep over every tracked lock
#[derive(Debug, Clone, Default)]
pub struct ReleaseReport {
    pub released: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, UnlockError)>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.released.is_empty() && self.failed.is_empty() {
            "No locks held".to_string()
        } else if self.failed.is_empty() {
            format!("{} locks released", self.released.len())
        } else {
            format!(
                "{} locks released, {} failed",
                self.released.len(),
                self.failed.len()
            )
        }
    }
}

/// Configuration for the lock store
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Where join locators written into lock files point
    pub endpoint: LinkerEndpoint,

    /// Extension appended to the locked file's name
    pub extension: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            endpoint: LinkerEndpoint::default(),
            extension: "lock".to_string(),
        }
    }
}

impl LockConfig {
    pub fn with_endpoint(mut self, endpoint: LinkerEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}
