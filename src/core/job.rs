//! Job domain model: one stage bound to one matrix combination

use crate::core::stage::CommandSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// One combination of matrix axis values, in axis declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Combination(Vec<(String, String)>);

impl Combination {
    /// The empty combination of a stage without axes
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value bound to an axis
    pub fn get(&self, axis: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether two combinations agree on every axis they share
    pub fn is_compatible_with(&self, other: &Combination) -> bool {
        self.iter()
            .all(|(axis, value)| other.get(axis).map_or(true, |v| v == value))
    }

    /// Signature used in job ids: `axis=value, axis=value`
    pub fn signature(&self) -> String {
        self.iter()
            .map(|(axis, value)| format!("{}={}", axis, value))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Environment variables exposing the combination to commands
    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(axis, value)| (matrix_env_name(axis), value.to_string()))
            .collect()
    }
}

/// `MATRIX_<AXIS>` with the axis upper-cased and non-alphanumerics as `_`
pub fn matrix_env_name(axis: &str) -> String {
    let suffix: String = axis
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("MATRIX_{}", suffix)
}

/// Job identity: stage name plus combination signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(stage: &str, combination: &Combination) -> Self {
        if combination.is_empty() {
            Self(stage.to_string())
        } else {
            Self(format!("{}({})", stage, combination.signature()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One concrete, schedulable unit of work
///
/// Jobs are immutable once expanded; their status lives in the scheduler's
/// run state.
#[derive(Debug, Clone)]
pub struct Job {
    /// Position in the job graph (expansion order)
    pub index: usize,

    pub id: JobId,

    /// Name of the stage this job was expanded from
    pub stage: String,

    pub combination: Combination,

    pub command: CommandSpec,

    pub critical: bool,

    /// Whether the job may be satisfied from the cache
    pub cacheable: bool,

    pub timeout: Option<Duration>,

    /// Declared input paths of the stage
    pub inputs: Vec<String>,

    /// Indices of the jobs this job depends on
    pub dependencies: Vec<usize>,

    /// Fingerprint of the declared inputs, supplied by the caller
    pub input_fingerprint: Option<String>,
}

/// The expanded job DAG
///
/// Jobs are stored in expansion order; every dependency index is lower than
/// the index of the job depending on it.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    jobs: Vec<Job>,
    dependents: Vec<Vec<usize>>,
    by_id: HashMap<JobId, usize>,
}

impl JobGraph {
    /// Build a graph from jobs already in expansion order
    pub fn from_jobs(jobs: Vec<Job>) -> Self {
        let mut dependents = vec![Vec::new(); jobs.len()];
        for job in &jobs {
            for &dep in &job.dependencies {
                dependents[dep].push(job.index);
            }
        }
        let by_id = jobs.iter().map(|job| (job.id.clone(), job.index)).collect();

        Self {
            jobs,
            dependents,
            by_id,
        }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, index: usize) -> &Job {
        &self.jobs[index]
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Find a job by id
    pub fn find(&self, id: &str) -> Option<&Job> {
        self.by_id
            .get(&JobId(id.to_string()))
            .map(|&index| &self.jobs[index])
    }

    /// Jobs that directly depend on the given job
    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    /// Jobs of a stage, in matrix order
    pub fn jobs_of_stage<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a Job> + 'a {
        self.jobs.iter().filter(move |job| job.stage == stage)
    }

    /// Attach an input fingerprint to a job
    pub fn set_fingerprint(&mut self, index: usize, fingerprint: Option<String>) {
        self.jobs[index].input_fingerprint = fingerprint;
    }
}
