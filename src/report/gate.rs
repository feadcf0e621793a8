//! Gate evaluation: turns job outcomes into a pass/fail verdict

use crate::core::{CancelReason, JobStatus};
use crate::report::aggregator::JobRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    /// Non-critical failures exceeded the tolerance
    Fail,
    /// A critical job failed or the run was cancelled
    FailCritical,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    /// Process exit code for this verdict
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Pass => 0,
            Verdict::Fail => 1,
            Verdict::FailCritical => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("pass"),
            Verdict::Fail => f.write_str("fail"),
            Verdict::FailCritical => f.write_str("fail-critical"),
        }
    }
}

/// How many non-critical failures a run may absorb
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTolerance {
    /// At most this many failed non-critical jobs
    Count(usize),
    /// Failed non-critical jobs as a percentage of all non-critical jobs
    Percent(f64),
}

impl FailureTolerance {
    /// Whether `failed` out of `total` non-critical jobs is acceptable
    pub fn allows(&self, failed: usize, total: usize) -> bool {
        match *self {
            FailureTolerance::Count(max) => failed <= max,
            FailureTolerance::Percent(max) => {
                if total == 0 {
                    return true;
                }
                (failed as f64 / total as f64) * 100.0 <= max
            }
        }
    }
}

impl fmt::Display for FailureTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureTolerance::Count(n) => write!(f, "at most {} failure(s)", n),
            FailureTolerance::Percent(p) => write!(f, "at most {}% failures", p),
        }
    }
}

/// Pass/fail policy of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GatePolicy {
    pub tolerance: FailureTolerance,
}

impl GatePolicy {
    pub fn new(tolerance: FailureTolerance) -> Self {
        Self { tolerance }
    }

    /// No non-critical failure is tolerated
    pub fn strict() -> Self {
        Self::new(FailureTolerance::Count(0))
    }

    pub fn with_tolerance(mut self, tolerance: FailureTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Computes the verdict of a finished run
pub struct GateEvaluator {
    policy: GatePolicy,
}

impl GateEvaluator {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }

    /// Evaluate the final job records
    pub fn evaluate(&self, records: &[JobRecord], cancellation: Option<&CancelReason>) -> Verdict {
        if cancellation.is_some() {
            return Verdict::FailCritical;
        }

        let critical_failure = records.iter().any(|r| {
            r.critical && matches!(r.status, JobStatus::Failed | JobStatus::Cancelled)
        });
        if critical_failure {
            return Verdict::FailCritical;
        }

        let non_critical = records.iter().filter(|r| !r.critical).count();
        let failed = records
            .iter()
            .filter(|r| !r.critical && r.status == JobStatus::Failed)
            .count();

        if self.policy.tolerance.allows(failed, non_critical) {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}
