//! Scenario-based tests for pipeline-orchestrator

mod helpers;

mod caching;
mod structure;
mod timeouts;
