//! Result aggregation: per-job records and the final run report

use crate::core::{CancelReason, Combination, FailureKind, JobGraph, JobStatus};
use crate::report::gate::Verdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Why a job failed, with enough detail to find its output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,

    /// First line of the error output
    pub message: String,

    /// Where the full output can be found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
}

impl FailureDetail {
    pub fn new(kind: FailureKind, message: impl AsRef<str>) -> Self {
        Self {
            kind,
            message: first_line(message.as_ref()),
            output_ref: None,
        }
    }

    pub fn with_output_ref(mut self, output_ref: Option<String>) -> Self {
        self.output_ref = output_ref;
        self
    }
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or("").trim().to_string()
}

/// Final outcome of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub stage: String,
    pub combination: Combination,
    pub critical: bool,
    pub status: JobStatus,

    /// Result was reused from the cache
    #[serde(default)]
    pub cached: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,

    /// Id of the failed or skipped dependency that caused a skip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl JobRecord {
    pub fn new(
        job_id: impl Into<String>,
        stage: impl Into<String>,
        combination: Combination,
        critical: bool,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            stage: stage.into(),
            combination,
            critical,
            status: JobStatus::Pending,
            cached: false,
            started_at: None,
            finished_at: None,
            output_ref: None,
            failure: None,
            skip_reason: None,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }
}

/// A non-fatal problem observed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWarning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub message: String,
}

/// The complete result of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// One record per job, in job order
    pub jobs: Vec<JobRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancelReason>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RunWarning>,

    pub verdict: Verdict,
}

impl RunReport {
    pub fn job(&self, job_id: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|r| r.job_id == job_id)
    }

    pub fn status_of(&self, job_id: &str) -> Option<JobStatus> {
        self.job(job_id).map(|r| r.status)
    }

    /// Number of jobs per final status
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.jobs {
            *counts.entry(record.status.to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|r| r.status == status).count()
    }

    pub fn cached_count(&self) -> usize {
        self.jobs.iter().filter(|r| r.cached).count()
    }

    pub fn is_pass(&self) -> bool {
        self.verdict.is_pass()
    }

    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }

    /// Whether the run was stopped by the global timeout
    pub fn timed_out(&self) -> bool {
        matches!(self.cancellation, Some(CancelReason::Timeout { .. }))
    }

    pub fn duration(&self) -> std::time::Duration {
        self.finished_at
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Collects per-job outcomes while a run is in progress
pub struct ResultAggregator {
    run_id: Uuid,
    pipeline: String,
    started_at: DateTime<Utc>,
    records: Vec<JobRecord>,
    cancellation: Option<CancelReason>,
    warnings: Vec<RunWarning>,
}

impl ResultAggregator {
    /// One pending record per job of the graph
    pub fn new(run_id: Uuid, pipeline: impl Into<String>, graph: &JobGraph) -> Self {
        let records = graph
            .jobs()
            .iter()
            .map(|job| {
                JobRecord::new(
                    job.id.as_str(),
                    job.stage.as_str(),
                    job.combination.clone(),
                    job.critical,
                )
            })
            .collect();

        Self {
            run_id,
            pipeline: pipeline.into(),
            started_at: Utc::now(),
            records,
            cancellation: None,
            warnings: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn cancellation(&self) -> Option<&CancelReason> {
        self.cancellation.as_ref()
    }

    pub fn record_started(&mut self, index: usize) {
        let record = &mut self.records[index];
        record.status = JobStatus::Running;
        record.started_at = Some(Utc::now());
    }

    pub fn record_cache_hit(&mut self, index: usize, output_ref: Option<String>) {
        let now = Utc::now();
        let record = &mut self.records[index];
        record.status = JobStatus::Succeeded;
        record.cached = true;
        record.started_at = Some(now);
        record.finished_at = Some(now);
        record.output_ref = output_ref;
    }

    pub fn record_succeeded(&mut self, index: usize, output_ref: Option<String>) {
        let record = &mut self.records[index];
        record.status = JobStatus::Succeeded;
        record.finished_at = Some(Utc::now());
        record.output_ref = output_ref;
    }

    pub fn record_failed(&mut self, index: usize, failure: FailureDetail) {
        let record = &mut self.records[index];
        record.status = JobStatus::Failed;
        record.finished_at = Some(Utc::now());
        record.output_ref = failure.output_ref.clone();
        record.failure = Some(failure);
    }

    pub fn record_skipped(&mut self, index: usize, because_of: impl Into<String>) {
        let record = &mut self.records[index];
        record.status = JobStatus::Skipped;
        record.skip_reason = Some(because_of.into());
    }

    pub fn record_cancelled(&mut self, index: usize) {
        let record = &mut self.records[index];
        record.status = JobStatus::Cancelled;
        if record.started_at.is_some() {
            record.finished_at = Some(Utc::now());
        }
    }

    /// Record the first cancellation reason; later ones are ignored
    pub fn set_cancellation(&mut self, reason: CancelReason) {
        if self.cancellation.is_none() {
            self.cancellation = Some(reason);
        }
    }

    pub fn warn(&mut self, job_id: Option<String>, message: impl Into<String>) {
        self.warnings.push(RunWarning {
            job_id,
            message: message.into(),
        });
    }

    /// Seal the report with the gate's verdict
    pub fn finish(self, verdict: Verdict) -> RunReport {
        RunReport {
            run_id: self.run_id,
            pipeline: self.pipeline,
            started_at: self.started_at,
            finished_at: Utc::now(),
            jobs: self.records,
            cancellation: self.cancellation,
            warnings: self.warnings,
            verdict,
        }
    }
}
