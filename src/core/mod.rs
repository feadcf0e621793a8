//! Core domain models
//!
//! This module defines the pipeline definition (stages, matrix axes,
//! settings), the expanded job model and the per-run state.

pub mod config;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod stage;
pub mod state;

pub use error::*;
pub use job::*;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
