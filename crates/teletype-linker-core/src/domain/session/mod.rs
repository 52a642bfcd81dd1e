//! Collaboration sessions
//!
//! # Architecture
//!
//! - **Coordinator**: `SessionCoordinator` runs the share and join flows and
//!   watches the host binding
//! - **Teardown**: `DeactivationReport` describes what deactivation released
//!
//! # Example
//!
//! ```ignore
//! use teletype_linker_core::domain::session::{CoordinatorConfig, SessionCoordinator};
//!
//! let coordinator = SessionCoordinator::new(
//!     CoordinatorConfig::default(),
//!     packages,
//!     workspace,
//!     events.clone(),
//! );
//! coordinator.consume_capability(teletype).await;
//!
//! // Share a file in a new portal
//! coordinator.handle_uri("atom://teletype-revit-linker/new?file=%2Fsrv%2Freport.rvt").await;
//!
//! // On plugin shutdown
//! let report = coordinator.deactivate().await;
//! println!("{}", report.summary());
//! ```

pub mod coordinator;
pub mod shutdown;

pub use coordinator::{
    CoordinatorConfig, DispatchOutcome, SessionCoordinator, ShareOutcome, SharePhase,
};
pub use shutdown::DeactivationReport;
