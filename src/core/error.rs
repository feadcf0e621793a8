//! Structural error taxonomy for pipeline definitions

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a pipeline definition.
///
/// All of these are fatal: the pipeline never starts.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read pipeline definition {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse pipeline definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("invalid stage name '{0}' (allowed characters: letters, digits, '_', '-', '.')")]
    InvalidStageName(String),

    #[error("stage '{stage}' has a malformed matrix axis '{axis}': {reason}")]
    MalformedAxis {
        stage: String,
        axis: String,
        reason: String,
    },

    #[error("invalid gate configuration: {0}")]
    InvalidGate(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// A dependency cycle, reported as the sequence of stages that closes it.
///
/// The first and last entries are the same stage, e.g. `a -> b -> a`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle detected: {}", .cycle.join(" -> "))]
pub struct DependencyCycleError {
    pub cycle: Vec<String>,
}

/// Errors produced by the graph builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error(transparent)]
    Cycle(#[from] DependencyCycleError),
}

/// Any structural error that stops a pipeline before scheduling.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}
