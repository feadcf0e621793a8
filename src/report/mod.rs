//! Run reporting: result aggregation and gate evaluation

pub mod aggregator;
pub mod gate;

pub use aggregator::{FailureDetail, JobRecord, ResultAggregator, RunReport, RunWarning};
pub use gate::{FailureTolerance, GateEvaluator, GatePolicy, Verdict};
