//! Matrix expansion: one job per combination of a stage's axis values

use crate::core::{Combination, Job, JobGraph, JobId, MatrixAxis};
use crate::planning::graph::StageGraph;
use tracing::debug;

/// Expands a stage graph into a job graph
pub struct MatrixExpander;

impl MatrixExpander {
    /// Cartesian product of axis values
    ///
    /// Outer-to-inner in axis declaration order: for `{A: [a1, a2], B: [b1,
    /// b2]}` this yields a1×b1, a1×b2, a2×b1, a2×b2. No axes yields exactly
    /// one empty combination.
    pub fn combinations(axes: &[MatrixAxis]) -> Vec<Combination> {
        if axes.iter().any(|axis| axis.values.is_empty()) {
            return Vec::new();
        }

        let total: usize = axes.iter().map(|axis| axis.values.len()).product();
        let mut combinations = Vec::with_capacity(total);
        let mut cursor = vec![0usize; axes.len()];

        for _ in 0..total {
            combinations.push(Combination::from_pairs(
                axes.iter()
                    .zip(&cursor)
                    .map(|(axis, &i)| (axis.name.clone(), axis.values[i].clone())),
            ));

            // Odometer increment, innermost axis fastest
            for position in (0..axes.len()).rev() {
                cursor[position] += 1;
                if cursor[position] < axes[position].values.len() {
                    break;
                }
                cursor[position] = 0;
            }
        }

        combinations
    }

    /// Expand every stage and wire job-level dependency edges
    ///
    /// A job of stage X depends on every job of each dependency stage Y
    /// whose combination agrees with it on the axes X and Y share. Axes
    /// only Y declares therefore fan in to all of Y's jobs.
    pub fn expand(graph: &StageGraph) -> JobGraph {
        let mut jobs: Vec<Job> = Vec::new();
        let mut stage_jobs: Vec<Vec<usize>> = Vec::with_capacity(graph.len());

        for (position, stage) in graph.stages().iter().enumerate() {
            let mut indices = Vec::new();

            for combination in Self::combinations(&stage.matrix) {
                let mut dependencies = Vec::new();
                for &dep_position in graph.dependencies(position) {
                    for &dep_index in &stage_jobs[dep_position] {
                        let dep_job: &Job = &jobs[dep_index];
                        if combination.is_compatible_with(&dep_job.combination) {
                            dependencies.push(dep_index);
                        }
                    }
                }

                let index = jobs.len();
                jobs.push(Job {
                    index,
                    id: JobId::new(&stage.name, &combination),
                    stage: stage.name.clone(),
                    combination,
                    command: stage.command.clone(),
                    critical: stage.critical,
                    cacheable: stage.cache,
                    timeout: stage.timeout,
                    inputs: stage.inputs.clone(),
                    dependencies,
                    input_fingerprint: None,
                });
                indices.push(index);
            }

            debug!("Expanded stage '{}' into {} job(s)", stage.name, indices.len());
            stage_jobs.push(indices);
        }

        JobGraph::from_jobs(jobs)
    }
}
