//! Service readiness resolution
//!
//! Before any session action the collaboration capability must be installed,
//! enabled, active, consumed and signed in. Installation and activation of the
//! collaboration package can race with our own startup, so the "consumed" and
//! "signed in" checks are retried on a fixed schedule. Configuration states
//! are reported at once: waiting does not fix them.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::types::{ReadinessState, RetryPolicy};
use crate::domain::events::{EventBus, LinkerEvent};
use crate::host::{CapabilityRef, PackageManager};

/// Resolves and caches the collaboration capability
#[derive(Clone)]
pub struct ReadinessResolver {
    packages: Arc<dyn PackageManager>,
    package_name: String,
    policy: RetryPolicy,

    /// Set once the capability has been consumed
    capability: Arc<RwLock<Option<CapabilityRef>>>,

    /// Cleared on teardown; pending retries stop rescheduling
    active: Arc<AtomicBool>,

    events: EventBus,
}

impl fmt::Debug for ReadinessResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessResolver")
            .field("package_name", &self.package_name)
            .field("policy", &self.policy)
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish()
    }
}

impl ReadinessResolver {
    pub fn new(
        packages: Arc<dyn PackageManager>,
        package_name: impl Into<String>,
        policy: RetryPolicy,
        active: Arc<AtomicBool>,
        events: EventBus,
    ) -> Self {
        Self {
            packages,
            package_name: package_name.into(),
            policy,
            capability: Arc::new(RwLock::new(None)),
            active,
            events,
        }
    }

    /// Record the capability handed over by the collaboration package
    pub async fn consume(&self, capability: CapabilityRef) {
        info!(package = %self.package_name, "Collaboration capability consumed");
        *self.capability.write().await = Some(capability);
    }

    /// The cached capability, without probing anything
    pub async fn capability(&self) -> Option<CapabilityRef> {
        self.capability.read().await.clone()
    }

    /// Resolve with the configured attempt budget
    pub async fn resolve(&self) -> Option<CapabilityRef> {
        self.resolve_with(self.policy.max_attempts).await
    }

    /// Resolve the capability, waiting at most `max_attempts` times
    ///
    /// Emits exactly one failure event when it gives up: `NotInstalled`,
    /// `Disabled`, `NotActivated` or, once the budget is spent, `NotConsumed`.
    pub async fn resolve_with(&self, max_attempts: u32) -> Option<CapabilityRef> {
        let mut remaining = max_attempts;

        loop {
            match self.check_capability().await {
                Ok(capability) => return Some(capability),
                Err(state) if !state.is_retryable() => {
                    self.report(state, None);
                    return None;
                }
                Err(_) => {}
            }

            if remaining == 0 {
                self.report(ReadinessState::ActiveNotConsumed, None);
                return None;
            }

            debug!(
                package = %self.package_name,
                remaining = remaining,
                "Capability not consumed yet, retrying"
            );
            if !self.wait().await {
                return None;
            }
            remaining -= 1;
        }
    }

    /// Sign-in check with the configured attempt budget
    pub async fn is_signed_in(&self) -> bool {
        self.is_signed_in_with(self.policy.max_attempts).await
    }

    /// Whether the capability is authenticated, polling up to `max_attempts` times
    ///
    /// Emits `NotSignedIn` once when the budget runs out.
    pub async fn is_signed_in_with(&self, max_attempts: u32) -> bool {
        let Some(capability) = self.resolve().await else {
            return false;
        };

        let mut remaining = max_attempts;
        loop {
            if remaining == 0 {
                self.report(ReadinessState::NotSignedIn, Some(capability));
                return false;
            }

            if capability.is_signed_in().await {
                return true;
            }

            debug!(remaining = remaining, "Not signed in yet, retrying");
            if !self.wait().await {
                return false;
            }
            remaining -= 1;
        }
    }

    /// Current readiness, checked once without side effects
    pub async fn state(&self) -> ReadinessState {
        if let Some(capability) = self.capability().await {
            return if capability.is_signed_in().await {
                ReadinessState::Ready
            } else {
                ReadinessState::NotSignedIn
            };
        }

        let name = self.package_name.as_str();
        if !self.packages.is_package_loaded(name) {
            ReadinessState::NotInstalled
        } else if self.packages.is_package_disabled(name) {
            ReadinessState::Disabled
        } else if !self.packages.is_package_active(name) {
            ReadinessState::NotActive
        } else {
            ReadinessState::ActiveNotConsumed
        }
    }

    /// One check: the capability, or the state standing in its way
    async fn check_capability(&self) -> Result<CapabilityRef, ReadinessState> {
        if let Some(capability) = self.capability().await {
            return Ok(capability);
        }

        let name = self.package_name.as_str();
        if !self.packages.is_package_loaded(name) {
            return Err(ReadinessState::NotInstalled);
        }
        if self.packages.is_package_disabled(name) {
            return Err(ReadinessState::Disabled);
        }
        if !self.packages.is_package_active(name) {
            debug!(package = %name, "Activating collaboration package");
            if !self.packages.activate_package(name).await {
                return Err(ReadinessState::NotActive);
            }
            // Activation may have handed the capability over already
            if let Some(capability) = self.capability().await {
                return Ok(capability);
            }
        }

        Err(ReadinessState::ActiveNotConsumed)
    }

    /// Sleep one retry interval; `false` once torn down
    async fn wait(&self) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            debug!("Readiness retry abandoned after teardown");
            return false;
        }
        sleep(self.policy.delay).await;
        self.active.load(Ordering::SeqCst)
    }

    fn report(&self, state: ReadinessState, capability: Option<CapabilityRef>) {
        warn!(
            package = %self.package_name,
            state = %state,
            "Collaboration capability unavailable"
        );
        let event = match state {
            ReadinessState::NotInstalled => LinkerEvent::NotInstalled,
            ReadinessState::Disabled => LinkerEvent::Disabled,
            ReadinessState::NotActive => LinkerEvent::NotActivated,
            ReadinessState::ActiveNotConsumed => LinkerEvent::NotConsumed,
            ReadinessState::NotSignedIn => match capability {
                Some(capability) => LinkerEvent::NotSignedIn(capability),
                None => return,
            },
            ReadinessState::Ready => return,
        };
        self.events.emit(event);
    }
}
