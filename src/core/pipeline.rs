//! Pipeline definition model

use crate::core::stage::Stage;
use crate::report::gate::GatePolicy;
use std::time::Duration;

/// Default grace period granted to running jobs after cancellation
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Default upper bound on a single cache lookup
pub const DEFAULT_CACHE_LOOKUP_TIMEOUT: Duration = Duration::from_millis(2000);

/// Run-level knobs of a pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Number of concurrent execution slots
    pub max_parallel: usize,

    /// Global run timeout
    pub timeout: Option<Duration>,

    /// How long running jobs get to honour a cancellation request
    pub cancel_grace: Duration,

    /// Cache lookups slower than this are treated as misses
    pub cache_lookup_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_parallel: default_parallelism(),
            timeout: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            cache_lookup_timeout: DEFAULT_CACHE_LOOKUP_TIMEOUT,
        }
    }
}

/// Available hardware parallelism, at least 1
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// A validated pipeline definition
///
/// Stage names are unique and matrix axes are well formed. Dependency
/// references and acyclicity are checked later by the graph builder.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Stages in declaration order
    pub stages: Vec<Stage>,

    /// Run settings
    pub settings: PipelineSettings,

    /// Pass/fail policy
    pub gate: GatePolicy,
}

impl Pipeline {
    /// Build a pipeline directly from stages
    pub fn new(name: impl Into<String>, stages: Vec<Stage>, gate: GatePolicy) -> Self {
        Pipeline {
            name: name.into(),
            stages,
            settings: PipelineSettings::default(),
            gate,
        }
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Total number of jobs after matrix expansion
    pub fn job_count(&self) -> usize {
        self.stages.iter().map(Stage::job_count).sum()
    }
}
