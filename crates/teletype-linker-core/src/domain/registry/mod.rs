//! Editor/session registry
//!
//! Tracks the editors open under collaboration and wires each one's
//! destruction to the release of its file lock.

pub mod editors;

pub use editors::EditorRegistry;
