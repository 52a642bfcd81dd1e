//! Session coordinator
//!
//! Drives the share and join flows. A share walks through
//! `ResolvingCapability → CheckingAuth → SharingSession → LockingFile →
//! OpeningEditor → Tracking`; any failure drops back to idle after the
//! responsible component has emitted its event. No partial state survives an
//! aborted share: a lock taken for a file that never opened is given back.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use url::Url;

use super::shutdown::{self, DeactivationReport};
use crate::domain::events::{EventBus, LinkerEvent};
use crate::domain::locator::SessionLocator;
use crate::domain::locking::{LockConfig, LockStore};
use crate::domain::readiness::{ReadinessResolver, ReadinessState, RetryPolicy};
use crate::domain::registry::EditorRegistry;
use crate::host::{
    CapabilityRef, Disposable, EditorRef, OpenOptions, PackageManager, PortalBindingManager,
    Workspace,
};

/// Where a share attempt is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharePhase {
    Idle,
    ResolvingCapability,
    CheckingAuth,
    SharingSession,
    LockingFile,
    OpeningEditor,
    Tracking,
}

impl SharePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ResolvingCapability => "resolving_capability",
            Self::CheckingAuth => "checking_auth",
            Self::SharingSession => "sharing_session",
            Self::LockingFile => "locking_file",
            Self::OpeningEditor => "opening_editor",
            Self::Tracking => "tracking",
        }
    }
}

impl fmt::Display for SharePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a share request ended
#[derive(Clone)]
pub enum ShareOutcome {
    /// Locked, opened and tracked
    Shared {
        editor: EditorRef,
        session_uri: String,
    },
    /// A local editor already showed the file and was focused instead
    ReusedEditor(EditorRef),
    /// Stopped at `at`; the cause was reported on the event channel
    Aborted { at: SharePhase },
}

impl ShareOutcome {
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared { .. })
    }

    pub fn aborted_at(&self) -> Option<SharePhase> {
        match self {
            Self::Aborted { at } => Some(*at),
            _ => None,
        }
    }

    pub fn editor(&self) -> Option<&EditorRef> {
        match self {
            Self::Shared { editor, .. } | Self::ReusedEditor(editor) => Some(editor),
            Self::Aborted { .. } => None,
        }
    }
}

impl fmt::Debug for ShareOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared {
                editor,
                session_uri,
            } => f
                .debug_struct("Shared")
                .field("editor", &editor.id())
                .field("session_uri", session_uri)
                .finish(),
            Self::ReusedEditor(editor) => f.debug_tuple("ReusedEditor").field(&editor.id()).finish(),
            Self::Aborted { at } => f.debug_struct("Aborted").field("at", at).finish(),
        }
    }
}

/// Result of routing a [`SessionLocator`]
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Share(ShareOutcome),
    /// Whether the locator reached the collaboration service
    Join { delegated: bool },
}

/// Knobs of the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name of the collaboration package checked for readiness
    pub package_name: String,
    pub retry: RetryPolicy,
    pub lock: LockConfig,
    /// Focus an already-open local editor instead of sharing the file again
    pub reuse_open_editor: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            package_name: "teletype".to_string(),
            retry: RetryPolicy::default(),
            lock: LockConfig::default(),
            reuse_open_editor: false,
        }
    }
}

/// Owns the collaboration state of one plugin lifetime
#[derive(Clone)]
pub struct SessionCoordinator {
    resolver: ReadinessResolver,
    locks: LockStore,
    registry: EditorRegistry,
    workspace: Arc<dyn Workspace>,
    reuse_open_editor: bool,

    /// Cleared once by `deactivate`
    active: Arc<AtomicBool>,

    /// Whether we believe the local party hosts a portal
    hosting: Arc<AtomicBool>,

    /// Set when the host-binding subscription has been made
    watching: Arc<AtomicBool>,
    binding_watch: Arc<Mutex<Option<Disposable>>>,

    events: EventBus,
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("resolver", &self.resolver)
            .field("locks", &self.locks)
            .field("reuse_open_editor", &self.reuse_open_editor)
            .field("active", &self.is_active())
            .field("hosting", &self.is_hosting())
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        packages: Arc<dyn PackageManager>,
        workspace: Arc<dyn Workspace>,
        events: EventBus,
    ) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let resolver = ReadinessResolver::new(
            packages,
            config.package_name,
            config.retry,
            active.clone(),
            events.clone(),
        );
        let locks = LockStore::new(config.lock, events.clone());
        let registry = EditorRegistry::new(locks.clone(), events.clone());

        Self {
            resolver,
            locks,
            registry,
            workspace,
            reuse_open_editor: config.reuse_open_editor,
            active,
            hosting: Arc::new(AtomicBool::new(false)),
            watching: Arc::new(AtomicBool::new(false)),
            binding_watch: Arc::new(Mutex::new(None)),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn locks(&self) -> &LockStore {
        &self.locks
    }

    pub fn registry(&self) -> &EditorRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &ReadinessResolver {
        &self.resolver
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_hosting(&self) -> bool {
        self.hosting.load(Ordering::SeqCst)
    }

    /// Hand over the collaboration capability
    pub async fn consume_capability(&self, capability: CapabilityRef) {
        self.resolver.consume(capability).await;
    }

    pub async fn readiness(&self) -> ReadinessState {
        self.resolver.state().await
    }

    /// Parse and route a raw locator; anything unrecognized is ignored
    pub async fn handle_uri(&self, raw: &str) -> Option<DispatchOutcome> {
        match SessionLocator::parse(raw) {
            Ok(locator) => Some(self.dispatch(locator).await),
            Err(e) => {
                debug!(uri = %raw, error = %e, "Ignoring locator");
                None
            }
        }
    }

    pub async fn dispatch(&self, locator: SessionLocator) -> DispatchOutcome {
        debug!(action = %locator.action(), "Dispatching locator");
        match locator {
            SessionLocator::New { file } => DispatchOutcome::Share(self.share(&file).await),
            SessionLocator::Join { session_uri } => DispatchOutcome::Join {
                delegated: self.join(&session_uri).await,
            },
        }
    }

    /// Share `file` in a new session and open it locked
    pub async fn share(&self, file: &Path) -> ShareOutcome {
        if !self.is_active() {
            debug!(file = %file.display(), "Share requested after deactivation");
            return ShareOutcome::Aborted {
                at: SharePhase::Idle,
            };
        }

        enter(file, SharePhase::ResolvingCapability);
        let Some(capability) = self.resolver.resolve().await else {
            return abort(file, SharePhase::ResolvingCapability);
        };

        enter(file, SharePhase::CheckingAuth);
        if !self.resolver.is_signed_in().await {
            return abort(file, SharePhase::CheckingAuth);
        }

        if self.reuse_open_editor {
            if let Some(editor) = self.registry.find_local_by_path(file).await {
                info!(file = %file.display(), editor = %editor.id(), "Reusing open editor");
                let focus = OpenOptions {
                    search_all_panes: true,
                };
                if let Err(e) = self.workspace.open(file, focus).await {
                    warn!(file = %file.display(), error = %e, "Failed to focus open editor");
                }
                return ShareOutcome::ReusedEditor(editor);
            }
        }

        enter(file, SharePhase::SharingSession);
        let Some(portal) = capability.share_portal().await else {
            warn!(file = %file.display(), "Collaboration service did not create a portal");
            self.events.emit(LinkerEvent::FailedToSharePortal);
            return abort(file, SharePhase::SharingSession);
        };
        if !self.is_active() {
            debug!(file = %file.display(), "Torn down while the portal was being shared");
            return abort(file, SharePhase::SharingSession);
        }
        self.hosting.store(true, Ordering::SeqCst);
        self.watch_host_binding(&capability).await;

        enter(file, SharePhase::LockingFile);
        if self.locks.acquire(file, &portal.delegate_uri).await.is_err() {
            return abort(file, SharePhase::LockingFile);
        }
        if !self.is_active() {
            // Teardown already swept; this lock would outlive us
            let _ = self.locks.release(file).await;
            return abort(file, SharePhase::LockingFile);
        }

        enter(file, SharePhase::OpeningEditor);
        let editor = match self.workspace.open(file, OpenOptions::default()).await {
            Ok(editor) => editor,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Failed to open locked file");
                let _ = self.locks.release(file).await;
                return abort(file, SharePhase::OpeningEditor);
            }
        };

        if !self.is_active() {
            // Never leave the file open without its lock
            warn!(file = %file.display(), "Torn down while opening, closing editor");
            if self.locks.is_tracked(file).await {
                let _ = self.locks.release(file).await;
            }
            editor.destroy();
            return abort(file, SharePhase::OpeningEditor);
        }

        enter(file, SharePhase::Tracking);
        if !self.registry.add_editor(editor.clone()).await {
            // Closed by the user, or the registry was cleared
            if self.locks.is_tracked(file).await {
                let _ = self.locks.release(file).await;
            }
            editor.destroy();
            return abort(file, SharePhase::Tracking);
        }
        info!(file = %file.display(), session = %portal.delegate_uri, "File shared");
        self.events.emit(LinkerEvent::SharedFile(file.to_path_buf()));

        ShareOutcome::Shared {
            editor,
            session_uri: portal.delegate_uri,
        }
    }

    /// Join the remote session at `session_uri`
    ///
    /// Joining changes nothing locally: the collaboration service opens the
    /// remote buffers itself and no lock is taken. Returns whether the
    /// locator was handed over.
    pub async fn join(&self, session_uri: &str) -> bool {
        if !self.is_active() {
            return false;
        }

        let Some(capability) = self.resolver.resolve().await else {
            return false;
        };
        if !self.resolver.is_signed_in().await {
            return false;
        }

        let parsed = match Url::parse(session_uri) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(session = %session_uri, error = %e, "Ignoring unparseable session locator");
                return false;
            }
        };

        info!(session = %session_uri, "Joining session");
        capability.handle_uri(&parsed, session_uri);
        true
    }

    /// Subscribe to host-binding changes, once per coordinator
    async fn watch_host_binding(&self, capability: &CapabilityRef) {
        if self.watching.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = capability.portal_binding_manager().await;
        let coordinator = self.clone();
        let observed = manager.clone();
        let handle = Handle::current();
        let subscription = manager.on_did_change(Arc::new(move || {
            let coordinator = coordinator.clone();
            let manager = observed.clone();
            handle.spawn(async move {
                coordinator.host_binding_changed(manager).await;
            });
        }));

        let previous = {
            let mut watch = self
                .binding_watch
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.is_active() {
                drop(watch);
                debug!("Torn down before the host binding watch was installed");
                subscription.dispose();
                return;
            }
            watch.replace(subscription)
        };
        debug!("Watching host portal binding");
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    async fn host_binding_changed(&self, manager: Arc<dyn PortalBindingManager>) {
        if !self.is_active() {
            return;
        }
        if manager.host_portal_binding().await.is_some() {
            return;
        }
        if !self.hosting.swap(false, Ordering::SeqCst) {
            return;
        }

        warn!("No longer hosting a portal");
        self.registry.close_portal().await;
    }

    /// Tear down: stop retries, stop watching, release every lock
    ///
    /// Safe to call more than once; later calls find nothing to do.
    pub async fn deactivate(&self) -> DeactivationReport {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        info!(was_active = was_active, "Deactivating session coordinator");

        let watch = self
            .binding_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let stopped_watching = watch.is_some();
        if let Some(watch) = watch {
            watch.dispose();
        }
        self.hosting.store(false, Ordering::SeqCst);

        let mut report = shutdown::sweep(&self.locks, &self.registry).await;
        report.stopped_watching = stopped_watching;
        report
    }
}

fn enter(file: &Path, phase: SharePhase) {
    debug!(file = %file.display(), phase = %phase, "Share phase");
}

fn abort(file: &Path, at: SharePhase) -> ShareOutcome {
    debug!(file = %file.display(), phase = %at, "Share aborted");
    ShareOutcome::Aborted { at }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EventKind;
    use crate::testing::{
        FAKE_PORTAL_URI, FakeCollaboration, FakePackageManager, FakeWorkspace, drain_events,
        next_event_of,
    };
    use crate::host::{Collaboration, EditorCallback, HostError, Portal};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Holds a host call until the test lets it through
    #[derive(Default)]
    struct Gate {
        entered: Notify,
        opened: Notify,
    }

    impl Gate {
        async fn pass(&self) {
            self.entered.notify_one();
            self.opened.notified().await;
        }
    }

    struct GatedWorkspace {
        inner: Arc<FakeWorkspace>,
        gate: Gate,
    }

    #[async_trait]
    impl Workspace for GatedWorkspace {
        async fn open(&self, path: &Path, options: OpenOptions) -> Result<EditorRef, HostError> {
            self.gate.pass().await;
            self.inner.open(path, options).await
        }

        fn text_editors(&self) -> Vec<EditorRef> {
            self.inner.text_editors()
        }

        fn on_did_add_text_editor(&self, callback: EditorCallback) -> Disposable {
            self.inner.on_did_add_text_editor(callback)
        }
    }

    struct GatedCollaboration {
        inner: Arc<FakeCollaboration>,
        gate: Gate,
    }

    #[async_trait]
    impl Collaboration for GatedCollaboration {
        async fn is_signed_in(&self) -> bool {
            self.inner.is_signed_in().await
        }

        async fn share_portal(&self) -> Option<Portal> {
            self.gate.pass().await;
            self.inner.share_portal().await
        }

        async fn portal_binding_manager(&self) -> Arc<dyn PortalBindingManager> {
            self.inner.portal_binding_manager().await
        }

        fn handle_uri(&self, parsed: &Url, raw: &str) {
            self.inner.handle_uri(parsed, raw)
        }

        fn show_popover(&self) {
            self.inner.show_popover()
        }
    }

    struct Fixture {
        coordinator: SessionCoordinator,
        workspace: Arc<FakeWorkspace>,
        capability: Arc<FakeCollaboration>,
        temp: TempDir,
    }

    impl Fixture {
        fn file(&self, name: &str) -> PathBuf {
            self.temp.path().join(name)
        }
    }

    async fn setup_with(config: CoordinatorConfig, capability: Arc<FakeCollaboration>) -> Fixture {
        let workspace = FakeWorkspace::new();
        let coordinator = SessionCoordinator::new(
            config,
            Arc::new(FakePackageManager::ready()),
            workspace.clone(),
            EventBus::default(),
        );
        coordinator.consume_capability(capability.clone()).await;
        Fixture {
            coordinator,
            workspace,
            capability,
            temp: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    async fn setup() -> Fixture {
        setup_with(CoordinatorConfig::default(), FakeCollaboration::signed_in()).await
    }

    fn kinds(events: &[LinkerEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind()).collect()
    }

    #[tokio::test]
    async fn test_share_locks_opens_and_tracks() {
        let fx = setup().await;
        let mut rx = fx.coordinator.events().subscribe();
        let file = fx.file("a.txt");

        let outcome = fx.coordinator.share(&file).await;

        assert!(outcome.is_shared());
        let lock = std::fs::read_to_string(fx.coordinator.locks().lock_path(&file)).unwrap();
        assert!(lock.starts_with("atom://teletype-revit-linker/join?teletypeURI="));
        assert_eq!(fx.workspace.opened(), vec![file.clone()]);
        assert_eq!(fx.coordinator.registry().len().await, 1);
        assert!(fx.coordinator.is_hosting());

        assert_eq!(
            kinds(&drain_events(&mut rx)),
            vec![
                EventKind::LockedFile,
                EventKind::AddedEditor,
                EventKind::SharedFile
            ]
        );
    }

    #[tokio::test]
    async fn test_share_aborts_on_existing_lock() {
        let fx = setup().await;
        let file = fx.file("a.txt");
        std::fs::write(fx.coordinator.locks().lock_path(&file), "someone else").unwrap();
        let mut rx = fx.coordinator.events().subscribe();

        let outcome = fx.coordinator.share(&file).await;

        assert_eq!(outcome.aborted_at(), Some(SharePhase::LockingFile));
        // Never open a file we could not lock
        assert!(fx.workspace.opened().is_empty());
        assert!(fx.coordinator.registry().is_empty().await);
        assert_eq!(fx.capability.share_calls(), 1);
        assert_eq!(kinds(&drain_events(&mut rx)), vec![EventKind::FailedToLockFile]);
    }

    #[tokio::test]
    async fn test_share_reports_missing_portal() {
        let fx = setup().await;
        fx.capability.set_portal(None);
        let mut rx = fx.coordinator.events().subscribe();
        let file = fx.file("a.txt");

        let outcome = fx.coordinator.share(&file).await;

        assert_eq!(outcome.aborted_at(), Some(SharePhase::SharingSession));
        assert!(!fx.coordinator.locks().lock_path(&file).exists());
        assert!(!fx.coordinator.is_hosting());
        assert_eq!(
            kinds(&drain_events(&mut rx)),
            vec![EventKind::FailedToSharePortal]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_share_requires_sign_in() {
        let fx = setup_with(CoordinatorConfig::default(), FakeCollaboration::signed_out()).await;
        let mut rx = fx.coordinator.events().subscribe();

        let outcome = fx.coordinator.share(&fx.file("a.txt")).await;

        assert_eq!(outcome.aborted_at(), Some(SharePhase::CheckingAuth));
        assert_eq!(fx.capability.share_calls(), 0);
        assert_eq!(kinds(&drain_events(&mut rx)), vec![EventKind::NotSignedIn]);
    }

    #[tokio::test]
    async fn test_share_without_collaboration_package() {
        let workspace = FakeWorkspace::new();
        let coordinator = SessionCoordinator::new(
            CoordinatorConfig::default(),
            Arc::new(FakePackageManager::absent()),
            workspace.clone(),
            EventBus::default(),
        );
        let mut rx = coordinator.events().subscribe();

        let outcome = coordinator.share(Path::new("/srv/a.txt")).await;

        assert_eq!(outcome.aborted_at(), Some(SharePhase::ResolvingCapability));
        assert!(workspace.opened().is_empty());
        assert_eq!(kinds(&drain_events(&mut rx)), vec![EventKind::NotInstalled]);
    }

    #[tokio::test]
    async fn test_open_failure_gives_lock_back() {
        let fx = setup().await;
        let file = fx.file("a.txt");
        fx.workspace.fail_open(&file);
        let mut rx = fx.coordinator.events().subscribe();

        let outcome = fx.coordinator.share(&file).await;

        assert_eq!(outcome.aborted_at(), Some(SharePhase::OpeningEditor));
        assert!(!fx.coordinator.locks().lock_path(&file).exists());
        assert!(fx.coordinator.locks().tracked().await.is_empty());
        assert_eq!(
            kinds(&drain_events(&mut rx)),
            vec![EventKind::LockedFile, EventKind::UnlockedFile]
        );
    }

    #[tokio::test]
    async fn test_reuse_open_editor_when_enabled() {
        let config = CoordinatorConfig {
            reuse_open_editor: true,
            ..Default::default()
        };
        let fx = setup_with(config, FakeCollaboration::signed_in()).await;
        let file = fx.file("a.txt");
        let first = fx.coordinator.share(&file).await;
        let first_id = first.editor().map(|e| e.id());

        let second = fx.coordinator.share(&file).await;

        assert!(matches!(second, ShareOutcome::ReusedEditor(_)));
        assert_eq!(second.editor().map(|e| e.id()), first_id);
        assert_eq!(fx.capability.share_calls(), 1);
        let calls = fx.workspace.open_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].1.search_all_panes);
    }

    #[tokio::test]
    async fn test_reshare_without_reuse_hits_own_lock() {
        let fx = setup().await;
        let file = fx.file("a.txt");
        assert!(fx.coordinator.share(&file).await.is_shared());

        let second = fx.coordinator.share(&file).await;

        assert_eq!(second.aborted_at(), Some(SharePhase::LockingFile));
        assert_eq!(fx.capability.share_calls(), 2);
    }

    #[tokio::test]
    async fn test_lost_host_binding_closes_portal_once() {
        let fx = setup().await;
        fx.coordinator.share(&fx.file("a.txt")).await;
        fx.coordinator.share(&fx.file("b.txt")).await;
        let bindings = fx.capability.bindings();
        assert_eq!(bindings.listener_count(), 1);

        let mut rx = fx.coordinator.events().subscribe();
        bindings.close_host_portal();

        let closed = next_event_of(&mut rx, EventKind::ClosedPortal).await;
        match closed {
            Some(LinkerEvent::ClosedPortal(editors)) => assert_eq!(editors.len(), 2),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!fx.coordinator.is_hosting());

        // A second change while not hosting reports nothing
        bindings.notify();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(drain_events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_binding_change_while_hosting_is_ignored() {
        let fx = setup().await;
        fx.coordinator.share(&fx.file("a.txt")).await;
        let mut rx = fx.coordinator.events().subscribe();

        fx.capability.bindings().notify();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(fx.coordinator.is_hosting());
        assert!(drain_events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_join_hands_locator_to_service() {
        let fx = setup().await;
        let mut rx = fx.coordinator.events().subscribe();

        assert!(fx.coordinator.join(FAKE_PORTAL_URI).await);

        let handled = fx.capability.handled_uris();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].1, FAKE_PORTAL_URI);
        assert!(fx.coordinator.locks().tracked().await.is_empty());
        assert!(drain_events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_join_ignores_unparseable_session() {
        let fx = setup().await;
        assert!(!fx.coordinator.join("not a url").await);
        assert!(fx.capability.handled_uris().is_empty());
    }

    #[tokio::test]
    async fn test_handle_uri_routes_and_ignores() {
        let fx = setup().await;
        let file = fx.file("report.rvt");
        let raw = LockConfig::default().endpoint.new_uri(&file);

        match fx.coordinator.handle_uri(&raw).await {
            Some(DispatchOutcome::Share(outcome)) => assert!(outcome.is_shared()),
            other => panic!("unexpected outcome {:?}", other),
        }

        let mut rx = fx.coordinator.events().subscribe();
        assert!(
            fx.coordinator
                .handle_uri("atom://teletype-revit-linker/open?file=x")
                .await
                .is_none()
        );
        assert!(fx.coordinator.handle_uri("%%%").await.is_none());
        assert!(drain_events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_releases_and_blocks_new_shares() {
        let fx = setup().await;
        let a = fx.file("a.txt");
        let b = fx.file("b.txt");
        fx.coordinator.share(&a).await;
        fx.coordinator.share(&b).await;

        let report = fx.coordinator.deactivate().await;

        assert_eq!(report.released.len(), 2);
        assert!(report.stopped_watching);
        assert_eq!(report.editors_untracked, 2);
        assert!(!fx.coordinator.locks().lock_path(&a).exists());
        assert!(!fx.coordinator.locks().lock_path(&b).exists());
        assert_eq!(fx.capability.bindings().listener_count(), 0);

        let after = fx.coordinator.share(&fx.file("c.txt")).await;
        assert_eq!(after.aborted_at(), Some(SharePhase::Idle));
        assert!(!fx.coordinator.join(FAKE_PORTAL_URI).await);

        let again = fx.coordinator.deactivate().await;
        assert_eq!(again.summary(), "Deactivated (nothing to clean up)");
    }

    #[tokio::test]
    async fn test_teardown_while_opening_leaves_no_unlocked_editor() {
        let fake = FakeWorkspace::new();
        let workspace = Arc::new(GatedWorkspace {
            inner: fake.clone(),
            gate: Gate::default(),
        });
        let coordinator = SessionCoordinator::new(
            CoordinatorConfig::default(),
            Arc::new(FakePackageManager::ready()),
            workspace.clone(),
            EventBus::default(),
        );
        coordinator
            .consume_capability(FakeCollaboration::signed_in())
            .await;
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.txt");
        let mut rx = coordinator.events().subscribe();

        let sharing = {
            let coordinator = coordinator.clone();
            let file = file.clone();
            tokio::spawn(async move { coordinator.share(&file).await })
        };
        workspace.gate.entered.notified().await;
        let report = coordinator.deactivate().await;
        assert_eq!(report.released, vec![file.clone()]);
        workspace.gate.opened.notify_one();
        let outcome = sharing.await.unwrap();

        assert_eq!(outcome.aborted_at(), Some(SharePhase::OpeningEditor));
        assert!(coordinator.registry().is_empty().await);
        // The editor that did open was closed again
        assert_eq!(fake.opened(), vec![file.clone()]);
        assert!(fake.fake_editors().is_empty());
        assert!(!coordinator.locks().lock_path(&file).exists());
        assert_eq!(
            kinds(&drain_events(&mut rx)),
            vec![EventKind::LockedFile, EventKind::UnlockedFile]
        );

        // Another participant takes the file; nothing of ours removes the lock
        std::fs::write(coordinator.locks().lock_path(&file), "other session").unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(coordinator.locks().lock_path(&file).exists());
    }

    #[tokio::test]
    async fn test_teardown_while_sharing_portal_installs_no_watch() {
        let inner = FakeCollaboration::signed_in();
        let capability = Arc::new(GatedCollaboration {
            inner: inner.clone(),
            gate: Gate::default(),
        });
        let workspace = FakeWorkspace::new();
        let coordinator = SessionCoordinator::new(
            CoordinatorConfig::default(),
            Arc::new(FakePackageManager::ready()),
            workspace.clone(),
            EventBus::default(),
        );
        coordinator.consume_capability(capability.clone()).await;
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.txt");

        let sharing = {
            let coordinator = coordinator.clone();
            let file = file.clone();
            tokio::spawn(async move { coordinator.share(&file).await })
        };
        capability.gate.entered.notified().await;
        let report = coordinator.deactivate().await;
        assert!(!report.stopped_watching);
        capability.gate.opened.notify_one();
        let outcome = sharing.await.unwrap();

        assert_eq!(outcome.aborted_at(), Some(SharePhase::SharingSession));
        assert!(!coordinator.is_hosting());
        assert_eq!(inner.bindings().listener_count(), 0);
        assert!(!coordinator.locks().lock_path(&file).exists());
        assert!(workspace.opened().is_empty());

        let again = coordinator.deactivate().await;
        assert!(!again.stopped_watching);
    }

    #[tokio::test]
    async fn test_watch_after_teardown_is_disposed_at_once() {
        let fx = setup().await;
        fx.coordinator.deactivate().await;
        let capability: CapabilityRef = fx.capability.clone();

        fx.coordinator.watch_host_binding(&capability).await;

        assert_eq!(fx.capability.bindings().listener_count(), 0);
        let report = fx.coordinator.deactivate().await;
        assert!(!report.stopped_watching);
    }
}
