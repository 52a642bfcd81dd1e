//! Linker event channel
//!
//! Every component reports outcomes through one typed channel. Presentation
//! (notifications, logs) subscribes to it; nothing in the core renders text
//! for the user.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::locking::{LockError, UnlockError};
use crate::host::{CapabilityRef, EditorRef};

/// Default buffer of the broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something that happened inside the linker
#[derive(Clone)]
pub enum LinkerEvent {
    /// An editor entered the registry
    AddedEditor(EditorRef),
    /// A file is now locked, open and shared
    SharedFile(PathBuf),
    /// Hosting was lost; these local editors are no longer collaborative
    ClosedPortal(Vec<EditorRef>),
    LockedFile(PathBuf),
    FailedToLockFile { file: PathBuf, error: LockError },
    UnlockedFile(PathBuf),
    FailedToUnlockFile { file: PathBuf, error: UnlockError },
    NotInstalled,
    Disabled,
    NotActivated,
    NotConsumed,
    /// Sign-in never succeeded; the capability can prompt the user
    NotSignedIn(CapabilityRef),
    FailedToSharePortal,
    HostUriHandlerUnregistered,
}

/// Payload-free discriminant of [`LinkerEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AddedEditor,
    SharedFile,
    ClosedPortal,
    LockedFile,
    FailedToLockFile,
    UnlockedFile,
    FailedToUnlockFile,
    NotInstalled,
    Disabled,
    NotActivated,
    NotConsumed,
    NotSignedIn,
    FailedToSharePortal,
    HostUriHandlerUnregistered,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddedEditor => "added-editor",
            Self::SharedFile => "shared-file",
            Self::ClosedPortal => "closed-portal",
            Self::LockedFile => "locked-file",
            Self::FailedToLockFile => "failed-lock-file",
            Self::UnlockedFile => "unlocked-file",
            Self::FailedToUnlockFile => "failed-unlock-file",
            Self::NotInstalled => "teletype-not-installed",
            Self::Disabled => "teletype-disabled",
            Self::NotActivated => "teletype-not-activated",
            Self::NotConsumed => "teletype-not-consumed",
            Self::NotSignedIn => "teletype-not-signed-in",
            Self::FailedToSharePortal => "teletype-failed-share-portal",
            Self::HostUriHandlerUnregistered => "host-not-registered-uri-handler",
        }
    }

    /// Failure kinds, as opposed to progress notifications
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::FailedToLockFile
                | Self::FailedToUnlockFile
                | Self::NotInstalled
                | Self::Disabled
                | Self::NotActivated
                | Self::NotConsumed
                | Self::NotSignedIn
                | Self::FailedToSharePortal
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LinkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AddedEditor(_) => EventKind::AddedEditor,
            Self::SharedFile(_) => EventKind::SharedFile,
            Self::ClosedPortal(_) => EventKind::ClosedPortal,
            Self::LockedFile(_) => EventKind::LockedFile,
            Self::FailedToLockFile { .. } => EventKind::FailedToLockFile,
            Self::UnlockedFile(_) => EventKind::UnlockedFile,
            Self::FailedToUnlockFile { .. } => EventKind::FailedToUnlockFile,
            Self::NotInstalled => EventKind::NotInstalled,
            Self::Disabled => EventKind::Disabled,
            Self::NotActivated => EventKind::NotActivated,
            Self::NotConsumed => EventKind::NotConsumed,
            Self::NotSignedIn(_) => EventKind::NotSignedIn,
            Self::FailedToSharePortal => EventKind::FailedToSharePortal,
            Self::HostUriHandlerUnregistered => EventKind::HostUriHandlerUnregistered,
        }
    }

    /// File the event is about, when there is exactly one
    pub fn file(&self) -> Option<&PathBuf> {
        match self {
            Self::SharedFile(file)
            | Self::LockedFile(file)
            | Self::UnlockedFile(file)
            | Self::FailedToLockFile { file, .. }
            | Self::FailedToUnlockFile { file, .. } => Some(file),
            _ => None,
        }
    }
}

impl fmt::Debug for LinkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddedEditor(editor) => f.debug_tuple("AddedEditor").field(&editor.id()).finish(),
            Self::ClosedPortal(editors) => f
                .debug_tuple("ClosedPortal")
                .field(&editors.iter().map(|e| e.id()).collect::<Vec<_>>())
                .finish(),
            Self::NotSignedIn(_) => f.write_str("NotSignedIn"),
            Self::FailedToLockFile { file, error } => f
                .debug_struct("FailedToLockFile")
                .field("file", file)
                .field("error", error)
                .finish(),
            Self::FailedToUnlockFile { file, error } => f
                .debug_struct("FailedToUnlockFile")
                .field("file", file)
                .field("error", error)
                .finish(),
            Self::SharedFile(file) | Self::LockedFile(file) | Self::UnlockedFile(file) => {
                f.debug_tuple(self.kind().as_str()).field(file).finish()
            }
            other => f.write_str(other.kind().as_str()),
        }
    }
}

/// Fan-out channel for [`LinkerEvent`]s
///
/// Emission never fails: with no subscriber the event is dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LinkerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: LinkerEvent) {
        trace!(event = %event.kind(), receivers = self.tx.receiver_count(), "Emitting event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
