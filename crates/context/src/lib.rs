//! Workspace context gathering.
//!
//! Produces a bounded snapshot of the workspace — AGENTS.md, file tree,
//! symbol map, git status — rendered into the system-prompt bundle the
//! executors hand to the model.

pub mod snapshot;
pub mod symbols;

pub use snapshot::{gather, ContextSnapshot};
pub use symbols::Symbol;
