//! Test: Structure - graph validation and matrix expansion before any run

use crate::helpers::*;
use pipeline_orchestrator::core::config::PipelineConfig;
use pipeline_orchestrator::core::{DefinitionError, GraphError, PipelineError};
use pipeline_orchestrator::execution::ExecutionEngine;
use pipeline_orchestrator::planning::{self, GraphBuilder};

#[tokio::test]
async fn test_cycle_is_rejected_before_scheduling() {
    let yaml = r#"
name: "cyclic"
gate:
  max_failures: 0
stages:
  - name: setup
    command: "make setup"
  - name: build
    depends_on: [setup, package]
    command: "make"
  - name: package
    depends_on: [build]
    command: "make package"
"#;
    let pipeline = pipeline(yaml);
    let executor = ScriptedExecutor::new();

    let result = ExecutionEngine::new(executor.clone()).execute(&pipeline).await;

    match result {
        Err(PipelineError::Graph(GraphError::Cycle(err))) => {
            assert_eq!(err.cycle.first(), err.cycle.last());
            assert!(err.cycle.contains(&"build".to_string()));
            assert!(err.cycle.contains(&"package".to_string()));
            assert!(!err.cycle.contains(&"setup".to_string()));
        }
        other => panic!("expected a cycle error, got {:?}", other.map(|r| r.verdict)),
    }
    assert_eq!(executor.calls(), 0);
}

#[tokio::test]
async fn test_unknown_dependency_is_rejected() {
    let yaml = r#"
name: "dangling"
gate:
  max_failures: 0
stages:
  - name: deploy
    depends_on: [build]
    command: "./deploy.sh"
"#;
    let pipeline = pipeline(yaml);
    let executor = ScriptedExecutor::new();

    let err = ExecutionEngine::new(executor.clone())
        .execute(&pipeline)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Graph(GraphError::UnknownDependency { ref stage, ref dependency })
            if stage == "deploy" && dependency == "build"
    ));
    assert_eq!(executor.calls(), 0);
}

#[test]
fn test_malformed_definitions_never_reach_the_graph() {
    let duplicate = r#"
name: "dup"
gate:
  max_failures: 0
stages:
  - name: test
    command: "pytest"
  - name: test
    command: "pytest -x"
"#;
    assert!(matches!(
        PipelineConfig::from_yaml(duplicate),
        Err(DefinitionError::DuplicateStage(_))
    ));

    let bad_axis = r#"
name: "axis"
gate:
  max_failures: 0
stages:
  - name: test
    matrix:
      version: {}
    command: "pytest"
"#;
    assert!(matches!(
        PipelineConfig::from_yaml(bad_axis),
        Err(DefinitionError::MalformedAxis { .. })
    ));
}

#[test]
fn test_graph_contains_exactly_the_declared_stages() {
    let yaml = r#"
name: "graph"
gate:
  max_failures: 0
stages:
  - name: package
    depends_on: [compile]
    command: "make package"
  - name: compile
    command: "make"
  - name: docs
    command: "make docs"
"#;
    let graph = GraphBuilder::build(&pipeline(yaml)).unwrap();

    let mut names: Vec<&str> = graph.stages().iter().map(|s| s.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["compile", "docs", "package"]);

    let order = graph.execution_order();
    let position = |name: &str| order.iter().position(|s| *s == name).unwrap();
    assert!(position("compile") < position("package"));
}

#[test]
fn test_matrix_expands_to_the_product_of_axes() {
    let yaml = r#"
name: "matrix"
gate:
  max_failures: 0
stages:
  - name: lint
    command: "ruff check ."
  - name: test
    depends_on: [lint]
    matrix:
      os: [linux, macos, windows]
      version: ["3.9", "3.10"]
      backend: [sqlite, postgres]
    command: "pytest"
"#;
    let pipeline = pipeline(yaml);
    let jobs = planning::plan(&pipeline).unwrap();

    assert_eq!(pipeline.job_count(), 13);
    assert_eq!(jobs.len(), 13);
    assert_eq!(jobs.jobs_of_stage("lint").count(), 1);
    assert_eq!(jobs.jobs_of_stage("test").count(), 12);

    let ids: Vec<&str> = jobs.jobs_of_stage("test").map(|j| j.id.as_str()).take(3).collect();
    assert_eq!(
        ids,
        vec![
            "test(os=linux, version=3.9, backend=sqlite)",
            "test(os=linux, version=3.9, backend=postgres)",
            "test(os=linux, version=3.10, backend=sqlite)",
        ]
    );

    let lint = jobs.find("lint").unwrap().index;
    assert!(jobs
        .jobs_of_stage("test")
        .all(|job| job.dependencies == vec![lint]));
}

#[test]
fn test_shared_axes_pair_matching_jobs() {
    let yaml = r#"
name: "per-version"
gate:
  max_failures: 0
stages:
  - name: build
    matrix:
      version: ["3.9", "3.10"]
    command: "python -m build"
  - name: test
    depends_on: [build]
    matrix:
      version: ["3.9", "3.10"]
    command: "pytest"
"#;
    let jobs = planning::plan(&pipeline(yaml)).unwrap();

    let build_39 = jobs.find("build(version=3.9)").unwrap().index;
    let test_39 = jobs.find("test(version=3.9)").unwrap();
    assert_eq!(test_39.dependencies, vec![build_39]);
}
