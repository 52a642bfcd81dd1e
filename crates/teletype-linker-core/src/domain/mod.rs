//! Domain layer
//!
//! Contains the session-and-lock coordination logic.

pub mod events;
pub mod locator;
pub mod locking;
pub mod readiness;
pub mod registry;
pub mod session;
