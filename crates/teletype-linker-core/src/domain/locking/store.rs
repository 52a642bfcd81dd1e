//! Lock store for exclusive file collaboration
//!
//! A file is locked by creating `<file>.lock` next to it with "create, fail if
//! exists" semantics. The lock file holds the join locator of the session that
//! owns the file, so whoever finds it knows where to go.
//!
//! The set of files this instance locked is the only authority for releasing:
//! a lock file that is not in it is never deleted by a session. The same set
//! drives the teardown sweep.

use std::collections::HashSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{LockConfig, LockError, LockRecord, LockResult, ReleaseReport, UnlockError};
use crate::domain::events::{EventBus, LinkerEvent};
use crate::domain::locator::SessionLocator;

/// Creates and removes per-file lock files
#[derive(Debug, Clone)]
pub struct LockStore {
    config: LockConfig,

    /// Files this instance currently holds a lock for
    tracked: Arc<RwLock<HashSet<PathBuf>>>,

    events: EventBus,
}

impl LockStore {
    pub fn new(config: LockConfig, events: EventBus) -> Self {
        Self {
            config,
            tracked: Arc::new(RwLock::new(HashSet::new())),
            events,
        }
    }

    /// Path of the lock file guarding `file`
    pub fn lock_path(&self, file: &Path) -> PathBuf {
        let mut name = OsString::from(file.as_os_str());
        name.push(".");
        name.push(&self.config.extension);
        PathBuf::from(name)
    }

    /// Lock `file` on behalf of the session at `session_uri`
    ///
    /// Emits `LockedFile` on success and `FailedToLockFile` otherwise.
    pub async fn acquire(&self, file: &Path, session_uri: &str) -> LockResult<PathBuf> {
        let lock_path = self.lock_path(file);
        let payload = self.config.endpoint.join_uri(session_uri);

        debug!(lock_path = %lock_path.display(), "Attempting to create lock file");

        match write_exclusive(&lock_path, payload.as_bytes()).await {
            Ok(()) => {
                self.tracked.write().await.insert(file.to_path_buf());
                info!(file = %file.display(), "File locked");
                self.events.emit(LinkerEvent::LockedFile(file.to_path_buf()));
                Ok(lock_path)
            }
            Err(e) => {
                let error = if e.kind() == io::ErrorKind::AlreadyExists {
                    LockError::AlreadyLocked {
                        file: file.to_path_buf(),
                        lock_path,
                    }
                } else {
                    LockError::io(lock_path, &e)
                };
                warn!(file = %file.display(), error = %error, "Failed to lock file");
                self.events.emit(LinkerEvent::FailedToLockFile {
                    file: file.to_path_buf(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Delete the lock file for `file`, if this instance holds it
    ///
    /// A file that is not tracked is never touched on disk: the lock there, if
    /// any, belongs to someone else. Failure is reported through
    /// `FailedToUnlockFile` and the returned error; callers are never expected
    /// to abort on it.
    pub async fn release(&self, file: &Path) -> Result<(), UnlockError> {
        if !self.is_tracked(file).await {
            let error = UnlockError::NotTracked {
                file: file.to_path_buf(),
            };
            warn!(file = %file.display(), error = %error, "Refusing to unlock file");
            self.events.emit(LinkerEvent::FailedToUnlockFile {
                file: file.to_path_buf(),
                error: error.clone(),
            });
            return Err(error);
        }

        self.remove_lock(file).await
    }

    /// Delete the lock file for `file` whoever created it
    ///
    /// For manual recovery from the command line; sessions always go through
    /// [`release`](Self::release).
    pub async fn force_release(&self, file: &Path) -> Result<(), UnlockError> {
        self.remove_lock(file).await
    }

    async fn remove_lock(&self, file: &Path) -> Result<(), UnlockError> {
        let lock_path = self.lock_path(file);

        match fs::remove_file(&lock_path).await {
            Ok(()) => {
                self.tracked.write().await.remove(file);
                info!(file = %file.display(), "File unlocked");
                self.events.emit(LinkerEvent::UnlockedFile(file.to_path_buf()));
                Ok(())
            }
            Err(e) => {
                let error = if e.kind() == io::ErrorKind::NotFound {
                    // Gone already; nothing is held any more
                    self.tracked.write().await.remove(file);
                    UnlockError::NotLocked {
                        file: file.to_path_buf(),
                        lock_path,
                    }
                } else {
                    UnlockError::IoFailure {
                        lock_path,
                        kind: e.kind(),
                        message: e.to_string(),
                    }
                };
                warn!(file = %file.display(), error = %error, "Failed to unlock file");
                self.events.emit(LinkerEvent::FailedToUnlockFile {
                    file: file.to_path_buf(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Release every tracked lock
    ///
    /// Each release runs independently; one failure does not stop the rest.
    pub async fn release_all(&self) -> ReleaseReport {
        let files: Vec<PathBuf> = self.tracked.read().await.iter().cloned().collect();
        if files.is_empty() {
            return ReleaseReport::default();
        }

        debug!(count = files.len(), "Releasing all tracked locks");

        let outcomes = join_all(files.iter().map(|file| self.release(file))).await;

        let mut report = ReleaseReport::default();
        for (file, outcome) in files.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.released.push(file),
                Err(e) => report.failed.push((file, e)),
            }
        }

        info!(summary = %report.summary(), "Lock sweep finished");
        report
    }

    /// Whether this instance believes it holds the lock for `file`
    pub async fn is_tracked(&self, file: &Path) -> bool {
        self.tracked.read().await.contains(file)
    }

    /// Files this instance currently holds locks for
    pub async fn tracked(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.tracked.read().await.iter().cloned().collect();
        files.sort();
        files
    }

    /// Read the lock file for `file`, if there is one
    pub async fn inspect(&self, file: &Path) -> LockResult<Option<LockRecord>> {
        let lock_path = self.lock_path(file);

        let join_uri = match fs::read_to_string(&lock_path).await {
            Ok(contents) => contents.trim().to_string(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LockError::io(lock_path, &e)),
        };

        let locked_at = fs::metadata(&lock_path)
            .await
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        let session_uri = match SessionLocator::parse(&join_uri) {
            Ok(SessionLocator::Join { session_uri }) => Some(session_uri),
            _ => None,
        };

        Ok(Some(LockRecord {
            file: file.to_path_buf(),
            lock_path,
            join_uri,
            session_uri,
            locked_at,
        }))
    }
}

/// Create `path` exclusively and fill it with `contents`
async fn write_exclusive(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;

    let written = async {
        file.write_all(contents).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = written {
        // Never leave a half-written lock behind
        drop(file);
        let _ = fs::remove_file(path).await;
        return Err(e);
    }

    Ok(())
}
