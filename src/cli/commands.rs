//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    pub file: PathBuf,

    /// Number of concurrent jobs (overrides settings.max_parallel)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Global run timeout in seconds (overrides settings.timeout_secs)
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Tolerated non-critical failures (overrides the gate section)
    #[arg(long)]
    pub max_failures: Option<usize>,

    /// Don't look up or store cached results
    #[arg(long)]
    pub no_cache: bool,

    /// Cache directory (defaults to the platform cache directory)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Directory for per-job output logs
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Working directory for commands and input fingerprinting
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,

    /// Write the final report as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Validate a pipeline definition without running it
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List the jobs a pipeline expands into
#[derive(Debug, Args, Clone)]
pub struct ListJobsCommand {
    /// Path to pipeline YAML file
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a specific run by ID
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
