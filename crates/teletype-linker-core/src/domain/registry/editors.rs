//! Registry of editors opened under collaboration

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::events::{EventBus, LinkerEvent};
use crate::domain::locking::LockStore;
use crate::host::{Disposable, EditorId, EditorRef};

struct TrackedEditor {
    editor: EditorRef,
    on_destroy: Disposable,
}

/// Tracks collaborative editors and unlocks their files when they close
///
/// An editor stays registered from `add_editor` until its destruction event
/// fires. Remote editors are tracked but never touch the lock store. Once
/// cleared at teardown the registry accepts nothing new.
#[derive(Clone)]
pub struct EditorRegistry {
    editors: Arc<RwLock<HashMap<EditorId, TrackedEditor>>>,
    locks: LockStore,
    closed: Arc<AtomicBool>,
    events: EventBus,
}

impl fmt::Debug for EditorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorRegistry")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl EditorRegistry {
    pub fn new(locks: LockStore, events: EventBus) -> Self {
        Self {
            editors: Arc::new(RwLock::new(HashMap::new())),
            locks,
            closed: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    /// Start tracking `editor`
    ///
    /// Normalizes the display mode so whitespace is never rewritten behind a
    /// participant's back, and attaches the destroy observer. Returns `false`
    /// if the editor was not taken: already tracked, already destroyed, or
    /// the registry was cleared.
    pub async fn add_editor(&self, editor: EditorRef) -> bool {
        let id = editor.id();
        let local_path = if editor.is_remote() { None } else { editor.path() };
        let mut editors = self.editors.write().await;
        if self.is_closed() {
            debug!(editor = %id, "Registry closed, not tracking editor");
            return false;
        }
        if editors.contains_key(&id) {
            debug!(editor = %id, "Editor already tracked");
            return false;
        }
        if editor.is_destroyed() {
            drop(editors);
            self.release_for_gone_editor(id, local_path).await;
            return false;
        }

        editor.set_soft_tabs(false);
        editor.set_soft_wrapped(true);

        let registry = self.clone();
        let handle = Handle::current();
        let observed_path = local_path.clone();
        let on_destroy = editor.on_did_destroy(Box::new(move || {
            handle.spawn(async move {
                registry.editor_destroyed(id, observed_path).await;
            });
        }));
        if on_destroy.is_disposed() {
            // Destroyed between the check and the subscription
            drop(editors);
            self.release_for_gone_editor(id, local_path).await;
            return false;
        }

        editors.insert(
            id,
            TrackedEditor {
                editor: editor.clone(),
                on_destroy,
            },
        );
        drop(editors);

        debug!(editor = %id, remote = editor.is_remote(), "Editor tracked");
        self.events.emit(LinkerEvent::AddedEditor(editor));
        true
    }

    /// The editor was gone before we could observe it
    async fn release_for_gone_editor(&self, id: EditorId, local_path: Option<PathBuf>) {
        debug!(editor = %id, "Editor already destroyed, not tracking");
        if let Some(path) = local_path {
            if self.locks.is_tracked(&path).await {
                let _ = self.locks.release(&path).await;
            }
        }
    }

    async fn editor_destroyed(&self, id: EditorId, local_path: Option<PathBuf>) {
        if let Some(path) = local_path {
            // Failure is already reported by the store
            let _ = self.locks.release(&path).await;
        }

        if let Some(tracked) = self.editors.write().await.remove(&id) {
            tracked.on_destroy.dispose();
            debug!(editor = %id, "Editor untracked after destroy");
        }
    }

    /// Hosting was lost: report every local editor
    ///
    /// The editors are left open. Closing them is up to whoever listens for
    /// `ClosedPortal`.
    pub async fn close_portal(&self) -> Vec<EditorRef> {
        let affected = self.local_editors().await;
        info!(editors = affected.len(), "Portal closed under local editors");
        self.events.emit(LinkerEvent::ClosedPortal(affected.clone()));
        affected
    }

    pub async fn editors(&self) -> Vec<EditorRef> {
        let mut editors: Vec<EditorRef> = self
            .editors
            .read()
            .await
            .values()
            .map(|t| t.editor.clone())
            .collect();
        editors.sort_by_key(|e| e.id());
        editors
    }

    /// Tracked editors that originated on this machine
    pub async fn local_editors(&self) -> Vec<EditorRef> {
        let mut editors = self.editors().await;
        editors.retain(|e| !e.is_remote());
        editors
    }

    pub async fn find_local_by_path(&self, path: &Path) -> Option<EditorRef> {
        self.local_editors()
            .await
            .into_iter()
            .find(|e| e.path().as_deref() == Some(path))
    }

    pub async fn contains(&self, id: EditorId) -> bool {
        self.editors.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.editors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.editors.read().await.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Detach every destroy observer, forget all editors and stop accepting
    /// new ones
    ///
    /// Returns how many editors were tracked.
    pub async fn clear(&self) -> usize {
        let drained: Vec<TrackedEditor> = {
            let mut editors = self.editors.write().await;
            self.closed.store(true, Ordering::SeqCst);
            editors.drain().map(|(_, tracked)| tracked).collect()
        };
        for tracked in &drained {
            tracked.on_destroy.dispose();
        }
        drained.len()
    }
}
