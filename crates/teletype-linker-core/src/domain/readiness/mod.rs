//! Collaboration service readiness
//!
//! Resolves the collaboration capability (installed, enabled, active,
//! consumed) and its authentication, with bounded fixed-delay retries.

pub mod resolver;
pub mod types;

pub use resolver::ReadinessResolver;
pub use types::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, ReadinessState, RetryPolicy};
