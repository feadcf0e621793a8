//! Pipeline execution engine

pub mod command;
pub mod engine;
mod scheduler;
pub mod shell;

pub use command::{
    CommandExecutor, CommandInvocation, CommandOutcome, CommandStatus, ExecutorError,
};
pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use shell::ShellExecutor;
