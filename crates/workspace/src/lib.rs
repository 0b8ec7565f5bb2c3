//! Workspace confinement utilities: safe path resolution, shell command
//! execution with timeout and cancellation, and the bounded file walker.

pub mod command;
pub mod path;
pub mod walk;

pub use command::{run_command, CommandError, CommandOutput, RunOptions};
pub use path::safe_join;
