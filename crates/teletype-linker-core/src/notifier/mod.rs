//! User-facing notifications
//!
//! The [`Notifier`] is the presentation subscriber of the event channel: it
//! turns [`LinkerEvent`]s into [`Notification`]s for the host's notification
//! area and executes the actions attached to them.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::events::{EventBus, LinkerEvent};
use crate::host::{EditorRef, HostConfig, UriHandlerRegistration};

/// Title used when a message only makes sense with its detail
pub const NOTIFICATION_TITLE: &str = "teletype-revit-linker";

const START_HINT: &str = "Use the Revit 'Edit Keynotes' button to start collaborating.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
}

/// Something the user can trigger from a notification
#[derive(Clone)]
pub enum NotificationAction {
    /// Destroy the editors; their locks follow through the registry
    CloseEditors(Vec<EditorRef>),
    /// Make the host the default handler for linker locators
    RegisterUriHandler,
}

impl fmt::Debug for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CloseEditors(editors) => f
                .debug_tuple("CloseEditors")
                .field(&editors.iter().map(|e| e.id()).collect::<Vec<_>>())
                .finish(),
            Self::RegisterUriHandler => f.write_str("RegisterUriHandler"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionButton {
    pub label: String,
    pub action: NotificationAction,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub detail: Option<String>,
    pub dismissable: bool,
    pub buttons: Vec<ActionButton>,
}

impl Notification {
    fn error(title: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.into(),
            detail: None,
            dismissable: true,
            buttons: Vec::new(),
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn with_button(mut self, label: impl Into<String>, action: NotificationAction) -> Self {
        self.buttons.push(ActionButton {
            label: label.into(),
            action,
        });
        self
    }
}

/// The host's notification area
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifications for `event`
///
/// Diagnostic events (added editor, lock bookkeeping) render nothing; they
/// are only logged, and only loudly in dev mode.
pub fn render(event: &LinkerEvent, dev_mode: bool) -> Vec<Notification> {
    match event {
        LinkerEvent::AddedEditor(editor) => {
            diagnostic(dev_mode, &format!("Added editor {}", editor.id()));
            Vec::new()
        }
        LinkerEvent::LockedFile(file) => {
            diagnostic(dev_mode, &format!("Locked file: {}", file.display()));
            Vec::new()
        }
        LinkerEvent::UnlockedFile(file) => {
            diagnostic(dev_mode, &format!("Unlocked file: {}", file.display()));
            Vec::new()
        }
        LinkerEvent::SharedFile(file) => vec![Notification {
            level: NotificationLevel::Success,
            title: NOTIFICATION_TITLE.to_string(),
            detail: Some(format!("You are now collaborating on {}.", file.display())),
            dismissable: false,
            buttons: Vec::new(),
        }],
        LinkerEvent::ClosedPortal(editors) => {
            if editors.is_empty() {
                return Vec::new();
            }
            let files: Vec<String> = editors
                .iter()
                .filter_map(|e| e.path())
                .map(|p| p.display().to_string())
                .collect();
            vec![
                Notification::error(NOTIFICATION_TITLE)
                    .with_detail(format!(
                        "You are no longer collaborating and are currently blocking other users \
                         from opening the following keynote files:\n{}",
                        files.join("\n")
                    ))
                    .with_button(
                        "Close Files",
                        NotificationAction::CloseEditors(editors.clone()),
                    ),
                Notification::error(NOTIFICATION_TITLE).with_detail(START_HINT),
            ]
        }
        LinkerEvent::FailedToLockFile { file, error } => {
            diagnostic(dev_mode, &error.to_string());
            vec![Notification::error(NOTIFICATION_TITLE).with_detail(format!(
                "Could not lock {}. It may have already been opened by another user. Try again!",
                file.display()
            ))]
        }
        LinkerEvent::FailedToUnlockFile { file, error } => {
            diagnostic(dev_mode, &error.to_string());
            vec![Notification::error(format!(
                "Failed to release lock on {}",
                file.display()
            ))]
        }
        LinkerEvent::NotInstalled => vec![Notification::error(
            "You must install Teletype before using teletype-revit-linker.",
        )],
        LinkerEvent::Disabled => vec![Notification::error(
            "You must enable Teletype before using teletype-revit-linker.",
        )],
        LinkerEvent::NotActivated => {
            vec![Notification::error("Could not activate Teletype package.")]
        }
        LinkerEvent::NotConsumed => vec![Notification::error("Could not consume Teletype service.")],
        LinkerEvent::NotSignedIn(_) => vec![
            Notification::error("You must sign in to Teletype before collaborating on keynotes."),
            Notification::error(START_HINT),
        ],
        LinkerEvent::FailedToSharePortal => {
            vec![Notification::error(NOTIFICATION_TITLE).with_detail(
                "Unable to share portal. Something's broken. \
                 Maybe try reinstalling teletype and teletype-revit-linker.",
            )]
        }
        LinkerEvent::HostUriHandlerUnregistered => vec![Notification {
            level: NotificationLevel::Info,
            title: NOTIFICATION_TITLE.to_string(),
            detail: None,
            dismissable: false,
            buttons: vec![ActionButton {
                label: "Register as Default URI Handler".to_string(),
                action: NotificationAction::RegisterUriHandler,
            }],
        }],
    }
}

fn diagnostic(dev_mode: bool, message: &str) {
    if dev_mode {
        info!(target: "teletype_linker::dev", "{}", message);
    } else {
        debug!("{}", message);
    }
}

/// Deliver everything `event` should show, plus its side effects
fn deliver(sink: &dyn NotificationSink, dev_mode: bool, event: &LinkerEvent) {
    for notification in render(event, dev_mode) {
        sink.notify(notification);
    }
    if let LinkerEvent::NotSignedIn(capability) = event {
        capability.show_popover();
    }
}

/// Event channel subscriber that feeds the host's notification area
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    host_config: Arc<dyn HostConfig>,
    dev_mode: bool,

    /// Subscribed at construction so nothing emitted before `start` is lost
    pending: Mutex<Option<broadcast::Receiver<LinkerEvent>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("dev_mode", &self.dev_mode)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Notifier {
    pub fn new(
        events: &EventBus,
        sink: Arc<dyn NotificationSink>,
        host_config: Arc<dyn HostConfig>,
        dev_mode: bool,
    ) -> Self {
        Self {
            sink,
            host_config,
            dev_mode,
            pending: Mutex::new(Some(events.subscribe())),
            task: Mutex::new(None),
        }
    }

    /// Start delivering events; later calls do nothing
    pub fn start(&self) {
        let Some(mut rx) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let sink = self.sink.clone();
        let dev_mode = self.dev_mode;
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => deliver(sink.as_ref(), dev_mode, &event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed = missed, "Notifier fell behind, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Notifier stopped");
        });

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    pub fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Deliver one event right away, bypassing the channel
    pub fn handle(&self, event: &LinkerEvent) {
        deliver(self.sink.as_ref(), self.dev_mode, event);
    }

    /// Run the action behind a notification button
    pub fn perform(&self, action: &NotificationAction) {
        match action {
            NotificationAction::CloseEditors(editors) => {
                info!(editors = editors.len(), "Closing editors");
                for editor in editors {
                    editor.destroy();
                }
            }
            NotificationAction::RegisterUriHandler => {
                info!("Registering as default URI handler");
                self.host_config
                    .set_uri_handler_registration(UriHandlerRegistration::Always);
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}
