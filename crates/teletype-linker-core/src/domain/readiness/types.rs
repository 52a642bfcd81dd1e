//! Readiness states and retry policy

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Attempts made before a readiness or sign-in check gives up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Fixed wait between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Where the collaboration capability stands
///
/// Recomputed on every check, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    NotInstalled,
    Disabled,
    /// Loaded and enabled but activation failed or has not happened
    NotActive,
    /// Active, but the capability has not been handed to us yet
    ActiveNotConsumed,
    NotSignedIn,
    Ready,
}

impl ReadinessState {
    /// Whether waiting can change the outcome
    ///
    /// Not consumed and not signed in are races with startup or with the user;
    /// the rest are configuration the user has to fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ActiveNotConsumed | Self::NotSignedIn)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::Disabled => "disabled",
            Self::NotActive => "not_active",
            Self::ActiveNotConsumed => "active_not_consumed",
            Self::NotSignedIn => "not_signed_in",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded, fixed-delay retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Longest a check can wait before declaring failure
    pub fn worst_case_wait(&self) -> Duration {
        self.delay * self.max_attempts
    }
}
