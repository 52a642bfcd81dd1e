//! Session locators
//!
//! Inbound requests arrive as URI-like strings of the form
//! `scheme://<linker-id>/<action>?<query>`. Two actions are recognised:
//! `new` (requires `file`) and `join` (requires `teletypeURI`).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use url::form_urlencoded::byte_serialize;

/// Query key carrying the file to share
pub const FILE_KEY: &str = "file";

/// Query key carrying the opaque session locator to join
pub const SESSION_KEY: &str = "teletypeURI";

/// Locator parse errors
///
/// The dispatch boundary treats every one of these as "not our concern" and
/// ignores the request without emitting an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("Malformed locator: {0}")]
    Malformed(String),

    #[error("Unrecognized locator action '{0}'")]
    UnknownAction(String),

    #[error("Locator action '{action}' is missing query key '{key}'")]
    MissingParameter { action: &'static str, key: &'static str },
}

impl LocatorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "E400",
            Self::UnknownAction(_) => "E401",
            Self::MissingParameter { .. } => "E402",
        }
    }
}

/// Action named by a locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorAction {
    New,
    Join,
}

impl LocatorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Join => "join",
        }
    }
}

impl fmt::Display for LocatorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one inbound request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SessionLocator {
    /// Share `file` in a new session
    New { file: PathBuf },
    /// Attach to the remote session identified by `session_uri`
    Join { session_uri: String },
}

impl SessionLocator {
    /// Parse a raw locator string
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        let url = Url::parse(raw.trim()).map_err(|e| LocatorError::Malformed(e.to_string()))?;

        let action = url.path().trim_matches('/');
        match action {
            "new" => {
                let file = query_value(&url, FILE_KEY).ok_or(LocatorError::MissingParameter {
                    action: "new",
                    key: FILE_KEY,
                })?;
                Ok(Self::New {
                    file: PathBuf::from(file),
                })
            }
            "join" => {
                let session_uri =
                    query_value(&url, SESSION_KEY).ok_or(LocatorError::MissingParameter {
                        action: "join",
                        key: SESSION_KEY,
                    })?;
                Ok(Self::Join { session_uri })
            }
            other => Err(LocatorError::UnknownAction(other.to_string())),
        }
    }

    pub fn action(&self) -> LocatorAction {
        match self {
            Self::New { .. } => LocatorAction::New,
            Self::Join { .. } => LocatorAction::Join,
        }
    }

    /// Parsed form of the session locator carried by a join request
    pub fn session_url(&self) -> Option<Url> {
        match self {
            Self::Join { session_uri } => Url::parse(session_uri).ok(),
            Self::New { .. } => None,
        }
    }
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// The `scheme://<linker-id>` prefix this instance answers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkerEndpoint {
    pub scheme: String,
    pub linker_id: String,
}

impl LinkerEndpoint {
    pub fn new(scheme: impl Into<String>, linker_id: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            linker_id: linker_id.into(),
        }
    }

    /// Build the join locator other participants use to enter `session_uri`
    pub fn join_uri(&self, session_uri: &str) -> String {
        let encoded: String = byte_serialize(session_uri.as_bytes()).collect();
        format!(
            "{}://{}/join?{}={}",
            self.scheme, self.linker_id, SESSION_KEY, encoded
        )
    }

    /// Build the locator that asks a running instance to share `file`
    pub fn new_uri(&self, file: &Path) -> String {
        let file = file.to_string_lossy();
        let encoded: String = byte_serialize(file.as_bytes()).collect();
        format!("{}://{}/new?{}={}", self.scheme, self.linker_id, FILE_KEY, encoded)
    }
}

impl Default for LinkerEndpoint {
    fn default() -> Self {
        Self::new("atom", "teletype-revit-linker")
    }
}
