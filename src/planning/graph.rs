//! Graph builder: turns a pipeline definition into a stage DAG

use crate::core::{DependencyCycleError, GraphError, Pipeline, Stage};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A validated, acyclic stage graph
///
/// Stages are held in topological order: dependencies come before their
/// dependents, and otherwise declaration order is kept.
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<Stage>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl StageGraph {
    /// Stages in topological order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Position of a stage in topological order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.position(name).map(|i| &self.stages[i])
    }

    /// Direct dependencies of a stage, in declaration order
    pub fn dependencies(&self, position: usize) -> &[usize] {
        &self.dependencies[position]
    }

    /// Stages that directly depend on a stage
    pub fn dependents(&self, position: usize) -> &[usize] {
        &self.dependents[position]
    }

    /// Stage names in topological order
    pub fn execution_order(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Builds stage graphs; a pure function of its input
pub struct GraphBuilder;

impl GraphBuilder {
    /// Validate dependency references and acyclicity, and order the stages
    pub fn build(pipeline: &Pipeline) -> Result<StageGraph, GraphError> {
        let declared: HashMap<&str, &Stage> = pipeline
            .stages
            .iter()
            .map(|s| (s.name.as_str(), s))
            .collect();

        for stage in &pipeline.stages {
            for dep in &stage.depends_on {
                if !declared.contains_key(dep.as_str()) {
                    return Err(GraphError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut order = Vec::with_capacity(pipeline.stages.len());
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for stage in &pipeline.stages {
            if !visited.contains(stage.name.as_str()) {
                Self::visit(stage, &declared, &mut visited, &mut stack, &mut order)?;
            }
        }

        let stages: Vec<Stage> = order.into_iter().cloned().collect();
        let index: HashMap<String, usize> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        let mut dependencies = Vec::with_capacity(stages.len());
        let mut dependents = vec![Vec::new(); stages.len()];
        for (position, stage) in stages.iter().enumerate() {
            let mut deps = Vec::with_capacity(stage.depends_on.len());
            for dep in &stage.depends_on {
                let dep_position = index[dep.as_str()];
                // Repeated names in depends_on collapse to one edge
                if !deps.contains(&dep_position) {
                    deps.push(dep_position);
                    dependents[dep_position].push(position);
                }
            }
            dependencies.push(deps);
        }

        debug!(
            "Built stage graph for '{}': {:?}",
            pipeline.name,
            stages.iter().map(|s| &s.name).collect::<Vec<_>>()
        );

        Ok(StageGraph {
            stages,
            index,
            dependencies,
            dependents,
        })
    }

    /// Depth-first post-order visit with a recursion stack
    ///
    /// A dependency that is still on the stack closes a cycle; the cycle is
    /// the stack suffix starting at that dependency.
    fn visit<'a>(
        stage: &'a Stage,
        declared: &HashMap<&str, &'a Stage>,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        order: &mut Vec<&'a Stage>,
    ) -> Result<(), DependencyCycleError> {
        stack.push(stage.name.as_str());

        for dep in &stage.depends_on {
            if let Some(start) = stack.iter().position(|name| *name == dep.as_str()) {
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.clone());
                return Err(DependencyCycleError { cycle });
            }
            if visited.contains(dep.as_str()) {
                continue;
            }
            let dep_stage = declared[dep.as_str()];
            Self::visit(dep_stage, declared, visited, stack, order)?;
        }

        stack.pop();
        visited.insert(stage.name.as_str());
        order.push(stage);
        Ok(())
    }
}
