//! pipeline-orchestrator - a CI pipeline orchestration engine
//!
//! Builds a stage dependency graph, expands matrix stages into jobs, runs
//! them concurrently with result caching, and gates the run on critical
//! and tolerated failures.

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod planning;
pub mod report;

// Re-export commonly used types
pub use cache::{CacheBackend, CacheManager, FsCacheBackend, InMemoryCacheBackend};
pub use core::{Job, JobGraph, JobId, JobStatus, Pipeline, PipelineError, Stage};
pub use execution::{CommandExecutor, ExecutionEngine, ExecutionEvent, ShellExecutor};
pub use planning::{GraphBuilder, MatrixExpander};
pub use report::{GatePolicy, RunReport, Verdict};
