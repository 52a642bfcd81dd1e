//! In-memory host and collaboration fakes
//!
//! Shared by unit tests and by the integration tests (via the
//! `test-helpers` feature). Every fake records what was asked of it so tests
//! can assert on interactions as well as outcomes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::TryRecvError};
use url::Url;

use crate::domain::events::{EventKind, LinkerEvent};
use crate::host::{
    ChangeCallback, Collaboration, DestroyCallback, Disposable, Editor, EditorCallback, EditorId,
    EditorRef, HostConfig, HostError, HostPortalBinding, OpenOptions, PackageManager, Portal,
    PortalBindingManager, UriHandlerRegistration, Workspace,
};
use crate::notifier::{Notification, NotificationSink};

/// Session locator handed out by [`FakeCollaboration`] unless told otherwise
pub const FAKE_PORTAL_URI: &str = "atom://teletype/portal/8d1e4f";

static NEXT_EDITOR_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything currently buffered on `rx`, without waiting
pub fn drain_events(rx: &mut broadcast::Receiver<LinkerEvent>) -> Vec<LinkerEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

/// Wait for the next event of `kind`, skipping others
///
/// Gives up after five seconds; cascades driven by spawned tasks finish well
/// within that.
pub async fn next_event_of(
    rx: &mut broadcast::Receiver<LinkerEvent>,
    kind: EventKind,
) -> Option<LinkerEvent> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if event.kind() == kind => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .ok()
        .flatten()
}

type Listeners<F> = Arc<Mutex<Vec<(u64, F)>>>;

fn subscribe<F: Send + 'static>(listeners: &Listeners<F>, callback: F) -> Disposable {
    let token = NEXT_SUBSCRIPTION.fetch_add(1, Ordering::SeqCst);
    lock(listeners).push((token, callback));
    let listeners = listeners.clone();
    Disposable::new(move || lock(&listeners).retain(|(t, _)| *t != token))
}

/// A text editor that records display-mode changes
pub struct FakeEditor {
    id: EditorId,
    path: Option<PathBuf>,
    remote: bool,
    soft_tabs: Mutex<Option<bool>>,
    soft_wrapped: Mutex<Option<bool>>,
    destroyed: AtomicBool,
    on_destroy: Listeners<DestroyCallback>,
}

impl FakeEditor {
    fn build(path: Option<PathBuf>, remote: bool) -> Arc<Self> {
        Arc::new(Self {
            id: EditorId(NEXT_EDITOR_ID.fetch_add(1, Ordering::SeqCst)),
            path,
            remote,
            soft_tabs: Mutex::new(None),
            soft_wrapped: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            on_destroy: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn local(path: impl Into<PathBuf>) -> Arc<Self> {
        Self::build(Some(path.into()), false)
    }

    pub fn remote(path: impl Into<PathBuf>) -> Arc<Self> {
        Self::build(Some(path.into()), true)
    }

    /// An editor with no backing file
    pub fn untitled() -> Arc<Self> {
        Self::build(None, false)
    }

    /// Last soft-tabs value set, if any
    pub fn soft_tabs(&self) -> Option<bool> {
        *lock(&self.soft_tabs)
    }

    /// Last soft-wrap value set, if any
    pub fn soft_wrapped(&self) -> Option<bool> {
        *lock(&self.soft_wrapped)
    }

    /// Destroy observers still attached
    pub fn destroy_observers(&self) -> usize {
        lock(&self.on_destroy).len()
    }
}

impl Editor for FakeEditor {
    fn id(&self) -> EditorId {
        self.id
    }

    fn path(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    fn is_remote(&self) -> bool {
        self.remote
    }

    fn set_soft_tabs(&self, enabled: bool) {
        *lock(&self.soft_tabs) = Some(enabled);
    }

    fn set_soft_wrapped(&self, enabled: bool) {
        *lock(&self.soft_wrapped) = Some(enabled);
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn on_did_destroy(&self, callback: DestroyCallback) -> Disposable {
        if self.is_destroyed() {
            return Disposable::empty();
        }
        subscribe(&self.on_destroy, callback)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks: Vec<_> = lock(&self.on_destroy).drain(..).collect();
        for (_, callback) in callbacks {
            callback();
        }
    }
}

/// A workspace that opens [`FakeEditor`]s on demand
#[derive(Default)]
pub struct FakeWorkspace {
    editors: Mutex<Vec<Arc<FakeEditor>>>,
    opened: Mutex<Vec<(PathBuf, OpenOptions)>>,
    failing: Mutex<HashSet<PathBuf>>,
    on_add: Listeners<EditorCallback>,
}

impl FakeWorkspace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every `open` of `path` fail
    pub fn fail_open(&self, path: impl Into<PathBuf>) {
        lock(&self.failing).insert(path.into());
    }

    /// Paths passed to `open`, in call order
    pub fn opened(&self) -> Vec<PathBuf> {
        lock(&self.opened).iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn open_calls(&self) -> Vec<(PathBuf, OpenOptions)> {
        lock(&self.opened).clone()
    }

    /// Simulate a participant's buffer showing up in this workspace
    pub fn add_remote_editor(&self, path: impl Into<PathBuf>) -> Arc<FakeEditor> {
        let editor = FakeEditor::remote(path);
        self.attach(editor.clone());
        editor
    }

    /// Simulate the user opening a file outside of any session
    pub fn add_local_editor(&self, path: impl Into<PathBuf>) -> Arc<FakeEditor> {
        let editor = FakeEditor::local(path);
        self.attach(editor.clone());
        editor
    }

    pub fn fake_editors(&self) -> Vec<Arc<FakeEditor>> {
        lock(&self.editors)
            .iter()
            .filter(|e| !e.is_destroyed())
            .cloned()
            .collect()
    }

    pub fn add_listeners(&self) -> usize {
        lock(&self.on_add).len()
    }

    fn attach(&self, editor: Arc<FakeEditor>) {
        lock(&self.editors).push(editor.clone());
        let callbacks: Vec<_> = lock(&self.on_add).iter().map(|(_, c)| c.clone()).collect();
        for callback in callbacks {
            callback(editor.clone());
        }
    }
}

#[async_trait]
impl Workspace for FakeWorkspace {
    async fn open(&self, path: &Path, options: OpenOptions) -> Result<EditorRef, HostError> {
        lock(&self.opened).push((path.to_path_buf(), options));

        if lock(&self.failing).contains(path) {
            return Err(HostError::OpenFailed {
                path: path.to_path_buf(),
                reason: "permission denied".to_string(),
            });
        }

        if options.search_all_panes {
            let existing = self
                .fake_editors()
                .into_iter()
                .find(|e| !e.remote && e.path.as_deref() == Some(path));
            if let Some(editor) = existing {
                return Ok(editor);
            }
        }

        let editor = FakeEditor::local(path);
        self.attach(editor.clone());
        Ok(editor)
    }

    fn text_editors(&self) -> Vec<EditorRef> {
        self.fake_editors()
            .into_iter()
            .map(|e| e as EditorRef)
            .collect()
    }

    fn on_did_add_text_editor(&self, callback: EditorCallback) -> Disposable {
        subscribe(&self.on_add, callback)
    }
}

type ActivateHook = Arc<dyn Fn() + Send + Sync>;

/// A package manager holding one switchable package
pub struct FakePackageManager {
    loaded: AtomicBool,
    disabled: AtomicBool,
    active: AtomicBool,
    activation_succeeds: AtomicBool,
    activations: AtomicU32,
    on_activate: Mutex<Option<ActivateHook>>,
}

impl FakePackageManager {
    fn build(loaded: bool) -> Self {
        Self {
            loaded: AtomicBool::new(loaded),
            disabled: AtomicBool::new(false),
            active: AtomicBool::new(loaded),
            activation_succeeds: AtomicBool::new(true),
            activations: AtomicU32::new(0),
            on_activate: Mutex::new(None),
        }
    }

    /// Loaded, enabled and active
    pub fn ready() -> Self {
        Self::build(true)
    }

    /// Not installed at all
    pub fn absent() -> Self {
        Self::build(false)
    }

    pub fn set_loaded(&self, value: bool) {
        self.loaded.store(value, Ordering::SeqCst);
    }

    pub fn set_disabled(&self, value: bool) {
        self.disabled.store(value, Ordering::SeqCst);
    }

    pub fn set_active(&self, value: bool) {
        self.active.store(value, Ordering::SeqCst);
    }

    pub fn set_activation_succeeds(&self, value: bool) {
        self.activation_succeeds.store(value, Ordering::SeqCst);
    }

    /// Run `hook` whenever activation succeeds
    pub fn on_activate(&self, hook: impl Fn() + Send + Sync + 'static) {
        *lock(&self.on_activate) = Some(Arc::new(hook));
    }

    pub fn activation_count(&self) -> u32 {
        self.activations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageManager for FakePackageManager {
    fn is_package_loaded(&self, _name: &str) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn is_package_disabled(&self, _name: &str) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    fn is_package_active(&self, _name: &str) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn activate_package(&self, _name: &str) -> bool {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if !self.activation_succeeds.load(Ordering::SeqCst) {
            return false;
        }
        self.active.store(true, Ordering::SeqCst);
        let hook = lock(&self.on_activate).clone();
        if let Some(hook) = hook {
            hook();
        }
        true
    }
}

/// Host configuration with a single switch
pub struct FakeHostConfig {
    registration: Mutex<UriHandlerRegistration>,
}

impl FakeHostConfig {
    pub fn new(registration: UriHandlerRegistration) -> Arc<Self> {
        Arc::new(Self {
            registration: Mutex::new(registration),
        })
    }
}

impl HostConfig for FakeHostConfig {
    fn uri_handler_registration(&self) -> UriHandlerRegistration {
        *lock(&self.registration)
    }

    fn set_uri_handler_registration(&self, value: UriHandlerRegistration) {
        *lock(&self.registration) = value;
    }
}

/// Portal bindings driven by the test
#[derive(Default)]
pub struct FakePortalBindingManager {
    host_binding: Mutex<Option<HostPortalBinding>>,
    on_change: Listeners<ChangeCallback>,
}

impl FakePortalBindingManager {
    pub fn set_host_binding(&self, binding: Option<HostPortalBinding>) {
        *lock(&self.host_binding) = binding;
    }

    /// Fire every change listener
    pub fn notify(&self) {
        let callbacks: Vec<_> = lock(&self.on_change).iter().map(|(_, c)| c.clone()).collect();
        for callback in callbacks {
            callback();
        }
    }

    /// Drop the host binding and tell listeners about it
    pub fn close_host_portal(&self) {
        self.set_host_binding(None);
        self.notify();
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.on_change).len()
    }
}

#[async_trait]
impl PortalBindingManager for FakePortalBindingManager {
    async fn host_portal_binding(&self) -> Option<HostPortalBinding> {
        lock(&self.host_binding).clone()
    }

    fn on_did_change(&self, callback: ChangeCallback) -> Disposable {
        subscribe(&self.on_change, callback)
    }
}

/// A collaboration service that shares on request
pub struct FakeCollaboration {
    signed_in: AtomicBool,
    sign_in_checks: AtomicU32,
    portal: Mutex<Option<Portal>>,
    share_calls: AtomicU32,
    handled: Mutex<Vec<(String, String)>>,
    popovers: AtomicU32,
    bindings: Arc<FakePortalBindingManager>,
}

impl FakeCollaboration {
    fn build(signed_in: bool) -> Arc<Self> {
        Arc::new(Self {
            signed_in: AtomicBool::new(signed_in),
            sign_in_checks: AtomicU32::new(0),
            portal: Mutex::new(Some(Portal {
                delegate_uri: FAKE_PORTAL_URI.to_string(),
            })),
            share_calls: AtomicU32::new(0),
            handled: Mutex::new(Vec::new()),
            popovers: AtomicU32::new(0),
            bindings: Arc::new(FakePortalBindingManager::default()),
        })
    }

    pub fn signed_in() -> Arc<Self> {
        Self::build(true)
    }

    pub fn signed_out() -> Arc<Self> {
        Self::build(false)
    }

    pub fn set_signed_in(&self, value: bool) {
        self.signed_in.store(value, Ordering::SeqCst);
    }

    /// What `share_portal` hands out; `None` simulates a service-side failure
    pub fn set_portal(&self, portal: Option<Portal>) {
        *lock(&self.portal) = portal;
    }

    pub fn sign_in_checks(&self) -> u32 {
        self.sign_in_checks.load(Ordering::SeqCst)
    }

    pub fn share_calls(&self) -> u32 {
        self.share_calls.load(Ordering::SeqCst)
    }

    /// `(parsed, raw)` pairs passed to `handle_uri`
    pub fn handled_uris(&self) -> Vec<(String, String)> {
        lock(&self.handled).clone()
    }

    pub fn popovers(&self) -> u32 {
        self.popovers.load(Ordering::SeqCst)
    }

    pub fn bindings(&self) -> Arc<FakePortalBindingManager> {
        self.bindings.clone()
    }
}

#[async_trait]
impl Collaboration for FakeCollaboration {
    async fn is_signed_in(&self) -> bool {
        self.sign_in_checks.fetch_add(1, Ordering::SeqCst);
        self.signed_in.load(Ordering::SeqCst)
    }

    async fn share_portal(&self) -> Option<Portal> {
        self.share_calls.fetch_add(1, Ordering::SeqCst);
        let portal = lock(&self.portal).clone();
        if let Some(portal) = &portal {
            self.bindings.set_host_binding(Some(HostPortalBinding {
                portal_uri: portal.delegate_uri.clone(),
            }));
        }
        portal
    }

    async fn portal_binding_manager(&self) -> Arc<dyn PortalBindingManager> {
        self.bindings.clone()
    }

    fn handle_uri(&self, parsed: &Url, raw: &str) {
        lock(&self.handled).push((parsed.to_string(), raw.to_string()));
    }

    fn show_popover(&self) {
        self.popovers.fetch_add(1, Ordering::SeqCst);
    }
}

/// Collects every notification delivered to it
#[derive(Default)]
pub struct FakeNotificationSink {
    delivered: Mutex<Vec<Notification>>,
}

impl FakeNotificationSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.delivered).clone()
    }

    pub fn titles(&self) -> Vec<String> {
        lock(&self.delivered).iter().map(|n| n.title.clone()).collect()
    }
}

impl NotificationSink for FakeNotificationSink {
    fn notify(&self, notification: Notification) {
        lock(&self.delivered).push(notification);
    }
}
