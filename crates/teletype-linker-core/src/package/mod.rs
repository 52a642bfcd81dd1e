//! Plugin lifecycle
//!
//! [`LinkerPackage`] is what a host plugin holds for its whole lifetime. It
//! wires the coordinator and the notifier to the host services, and exposes a
//! [`LinkerService`] to other plugins.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::Config;
use crate::domain::events::{EventBus, LinkerEvent};
use crate::domain::locator::SessionLocator;
use crate::domain::readiness::ReadinessState;
use crate::domain::session::{DispatchOutcome, SessionCoordinator};
use crate::host::{
    CapabilityRef, CompositeDisposable, EditorRef, HostConfig, PackageManager,
    UriHandlerRegistration, Workspace,
};
use crate::notifier::{NotificationAction, NotificationSink, Notifier};

pub use crate::domain::session::DeactivationReport;

/// Everything the host editor provides
#[derive(Clone)]
pub struct HostServices {
    pub workspace: Arc<dyn Workspace>,
    pub packages: Arc<dyn PackageManager>,
    pub config: Arc<dyn HostConfig>,
    pub notifications: Arc<dyn NotificationSink>,
}

/// The linker as seen by the host plugin
pub struct LinkerPackage {
    coordinator: SessionCoordinator,
    notifier: Notifier,
    workspace: Arc<dyn Workspace>,
    subscriptions: CompositeDisposable,
    events: EventBus,
}

impl fmt::Debug for LinkerPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkerPackage")
            .field("coordinator", &self.coordinator)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl LinkerPackage {
    pub fn new(host: HostServices, config: &Config) -> Self {
        let events = EventBus::new(config.events.capacity);
        let coordinator = SessionCoordinator::new(
            config.coordinator_config(),
            host.packages,
            host.workspace.clone(),
            events.clone(),
        );
        let notifier = Notifier::new(
            &events,
            host.notifications,
            host.config.clone(),
            config.notifications.dev_mode,
        );

        let registration = host.config.uri_handler_registration();
        if registration != UriHandlerRegistration::Always {
            debug!(registration = ?registration, "Host is not the default URI handler");
            events.emit(LinkerEvent::HostUriHandlerUnregistered);
        }

        Self {
            coordinator,
            notifier,
            workspace: host.workspace,
            subscriptions: CompositeDisposable::new(),
            events,
        }
    }

    /// Start notifications and track remote editors as they appear
    pub async fn activate(&self) {
        info!("Activating linker package");
        self.notifier.start();

        for editor in self.workspace.text_editors() {
            if editor.is_remote() {
                self.coordinator.registry().add_editor(editor).await;
            }
        }

        let registry = self.coordinator.registry().clone();
        let handle = Handle::current();
        self.subscriptions
            .add(self.workspace.on_did_add_text_editor(Arc::new(move |editor: EditorRef| {
                if !editor.is_remote() {
                    return;
                }
                let registry = registry.clone();
                handle.spawn(async move {
                    registry.add_editor(editor).await;
                });
            })));
    }

    /// The collaboration package handed over its service
    pub async fn consume_teletype(&self, capability: CapabilityRef) {
        self.coordinator.consume_capability(capability).await;
    }

    pub fn provide_service(&self) -> LinkerService {
        LinkerService {
            coordinator: self.coordinator.clone(),
            events: self.events.clone(),
        }
    }

    /// Route a raw locator; unparseable or unknown ones are ignored
    pub async fn handle_uri(&self, raw: &str) -> Option<DispatchOutcome> {
        self.coordinator.handle_uri(raw).await
    }

    /// Run a notification button's action
    pub fn perform(&self, action: &NotificationAction) {
        self.notifier.perform(action);
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Release every lock and drop every subscription
    pub async fn deactivate(&self) -> DeactivationReport {
        let report = self.coordinator.deactivate().await;
        self.subscriptions.dispose();
        self.notifier.stop();
        info!(summary = %report.summary(), "Linker package deactivated");
        report
    }
}

/// Handle other plugins use to drive the linker
#[derive(Debug, Clone)]
pub struct LinkerService {
    coordinator: SessionCoordinator,
    events: EventBus,
}

impl LinkerService {
    pub async fn dispatch(&self, locator: SessionLocator) -> DispatchOutcome {
        self.coordinator.dispatch(locator).await
    }

    pub async fn handle_uri(&self, raw: &str) -> Option<DispatchOutcome> {
        self.coordinator.handle_uri(raw).await
    }

    pub async fn readiness(&self) -> ReadinessState {
        self.coordinator.readiness().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkerEvent> {
        self.events.subscribe()
    }
}
