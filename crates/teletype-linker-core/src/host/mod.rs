//! Host editor and collaboration service interfaces
//!
//! The linker never talks to an editor or to Teletype directly. Everything it
//! needs from them is expressed by the traits in this module:
//!
//! - **Host editor**: [`Workspace`], [`Editor`], [`PackageManager`], [`HostConfig`]
//! - **Collaboration capability**: [`Collaboration`], [`PortalBindingManager`]
//!
//! Subscriptions return a [`Disposable`].

pub mod disposable;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub use disposable::{CompositeDisposable, Disposable};

/// Shared handle to an open editor
pub type EditorRef = Arc<dyn Editor>;

/// Shared handle to the resolved collaboration capability
pub type CapabilityRef = Arc<dyn Collaboration>;

/// Fired exactly once when an editor is destroyed
pub type DestroyCallback = Box<dyn FnOnce() + Send>;

/// Fired whenever an observed value changes
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Fired for every editor added to the workspace
pub type EditorCallback = Arc<dyn Fn(EditorRef) + Send + Sync>;

/// Errors reported by the host editor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Failed to open {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },
}

/// Identity of an editor, unique for the lifetime of the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EditorId(pub u64);

impl fmt::Display for EditorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "editor-{}", self.0)
    }
}

/// A text editor in the host workspace
pub trait Editor: Send + Sync {
    fn id(&self) -> EditorId;

    /// Path of the buffer, if it is backed by a file
    fn path(&self) -> Option<PathBuf>;

    /// Whether the editor mirrors a buffer hosted by another participant
    fn is_remote(&self) -> bool;

    /// Toggle expansion of tabs into spaces
    fn set_soft_tabs(&self, enabled: bool);

    /// Toggle soft line wrapping
    fn set_soft_wrapped(&self, enabled: bool);

    /// Whether the editor has already gone away
    fn is_destroyed(&self) -> bool;

    /// Register the one callback fired when the editor goes away
    ///
    /// An editor that is already destroyed hands back a disposed
    /// [`Disposable`] and never fires `callback`.
    fn on_did_destroy(&self, callback: DestroyCallback) -> Disposable;

    fn destroy(&self);
}

/// Options for [`Workspace::open`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Activate an existing pane item for the path instead of opening a new one
    pub search_all_panes: bool,
}

/// The host workspace
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn open(&self, path: &Path, options: OpenOptions) -> Result<EditorRef, HostError>;

    /// All editors currently open
    fn text_editors(&self) -> Vec<EditorRef>;

    fn on_did_add_text_editor(&self, callback: EditorCallback) -> Disposable;
}

/// The host package manager, used to check on the collaboration package
#[async_trait]
pub trait PackageManager: Send + Sync {
    fn is_package_loaded(&self, name: &str) -> bool;

    fn is_package_disabled(&self, name: &str) -> bool;

    fn is_package_active(&self, name: &str) -> bool;

    /// Activate a loaded package; `false` when activation failed
    async fn activate_package(&self, name: &str) -> bool;
}

/// Whether the host registers itself as the default handler for locators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UriHandlerRegistration {
    Prompt,
    Always,
    Never,
}

/// The slice of host configuration the linker reads and writes
pub trait HostConfig: Send + Sync {
    fn uri_handler_registration(&self) -> UriHandlerRegistration;

    fn set_uri_handler_registration(&self, value: UriHandlerRegistration);
}

/// A session shared by the local participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Portal {
    /// Opaque locator other participants use to join
    pub delegate_uri: String,
}

/// The local participant's hosting binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPortalBinding {
    pub portal_uri: String,
}

/// Tracks which portals the local participant is bound to
#[async_trait]
pub trait PortalBindingManager: Send + Sync {
    /// The binding for the portal we host, if any
    async fn host_portal_binding(&self) -> Option<HostPortalBinding>;

    fn on_did_change(&self, callback: ChangeCallback) -> Disposable;
}

/// The collaboration capability (Teletype)
#[async_trait]
pub trait Collaboration: Send + Sync {
    async fn is_signed_in(&self) -> bool;

    /// Host a new portal; `None` when the service could not create one
    async fn share_portal(&self) -> Option<Portal>;

    async fn portal_binding_manager(&self) -> Arc<dyn PortalBindingManager>;

    /// Hand a session locator to the service, in parsed and raw form
    fn handle_uri(&self, parsed: &Url, raw: &str);

    /// Surface the service's own sign-in prompt
    fn show_popover(&self);
}
