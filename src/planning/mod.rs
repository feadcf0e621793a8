//! Planning: stage graph construction and matrix expansion

pub mod graph;
pub mod matrix;

pub use graph::{GraphBuilder, StageGraph};
pub use matrix::MatrixExpander;

use crate::core::{GraphError, JobGraph, Pipeline};

/// Build the stage graph and expand it into the job graph
pub fn plan(pipeline: &Pipeline) -> Result<JobGraph, GraphError> {
    let stages = GraphBuilder::build(pipeline)?;
    Ok(MatrixExpander::expand(&stages))
}
