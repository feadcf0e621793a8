use pipeline_orchestrator::cache::{CacheManager, FileFingerprinter, FsCacheBackend};
use pipeline_orchestrator::cli::commands::{
    HistoryCommand, ListJobsCommand, RunCommand, ValidateCommand,
};
use pipeline_orchestrator::cli::output::*;
use pipeline_orchestrator::cli::{Cli, Command};
use pipeline_orchestrator::core::config::PipelineConfig;
use pipeline_orchestrator::core::Pipeline;
use pipeline_orchestrator::execution::{ExecutionEngine, ShellExecutor};
use pipeline_orchestrator::persistence::{HistoryBackend, RunSummary};
use pipeline_orchestrator::planning;
use pipeline_orchestrator::report::FailureTolerance;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for definition and structural errors; nothing was run
const EXIT_DEFINITION_ERROR: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to set logging subscriber")?;

    // Execute command
    let code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::ListJobs(cmd) => list_jobs(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Load and validate a definition, printing the error on failure
fn load_pipeline(file: &Path) -> Option<Pipeline> {
    match PipelineConfig::from_file(file).and_then(|config| config.to_pipeline()) {
        Ok(pipeline) => Some(pipeline),
        Err(e) => {
            println!("{} Invalid pipeline definition {}:", CROSS, file.display());
            println!("  {}", style(e).red());
            None
        }
    }
}

async fn run_pipeline(cmd: &RunCommand) -> Result<i32> {
    let Some(mut pipeline) = load_pipeline(&cmd.file) else {
        return Ok(EXIT_DEFINITION_ERROR);
    };

    // CLI flags override the definition's settings and gate
    if let Some(workers) = cmd.workers {
        if workers == 0 {
            println!("{} --workers must be at least 1", CROSS);
            return Ok(EXIT_DEFINITION_ERROR);
        }
        pipeline.settings.max_parallel = workers;
    }
    if let Some(secs) = cmd.timeout_secs {
        pipeline.settings.timeout = Some(Duration::from_secs(secs));
    }
    if let Some(max) = cmd.max_failures {
        pipeline.gate = pipeline.gate.with_tolerance(FailureTolerance::Count(max));
    }

    if !cmd.json {
        println!(
            "{} Loaded pipeline: {} ({} stage(s), {} job(s), {} worker(s))",
            INFO,
            style(&pipeline.name).bold(),
            pipeline.stages.len(),
            pipeline.job_count(),
            pipeline.settings.max_parallel
        );
    }

    let workdir = match &cmd.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to resolve working directory")?,
    };
    let log_dir = cmd
        .log_dir
        .clone()
        .unwrap_or_else(|| default_log_dir(&pipeline.name));

    let executor = ShellExecutor::new(&log_dir)
        .with_workdir(&workdir)
        .with_grace(pipeline.settings.cancel_grace);
    let mut engine =
        ExecutionEngine::new(executor).with_fingerprinter(FileFingerprinter::new(&workdir));

    if !cmd.no_cache {
        let backend = match &cmd.cache_dir {
            Some(dir) => FsCacheBackend::new(dir),
            None => FsCacheBackend::with_default_path(),
        };
        match backend {
            Ok(backend) => engine = engine.with_cache(CacheManager::new(Arc::new(backend))),
            Err(e) => warn!("Cache unavailable, running without it: {}", e),
        }
    }

    // Console output
    let progress = if cmd.json {
        ProgressBar::hidden()
    } else {
        create_progress_bar(pipeline.job_count())
    };
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        bar.println(format_execution_event(event));
        if finishes_job(event) {
            bar.inc(1);
        }
    });

    let report = match engine.execute(&pipeline).await {
        Ok(report) => report,
        Err(e) => {
            progress.finish_and_clear();
            println!("{} {}", CROSS, style(e).red());
            return Ok(EXIT_DEFINITION_ERROR);
        }
    };
    progress.finish_and_clear();

    // Save to history
    if !cmd.no_history {
        let summary = RunSummary::from_report(&report);
        match open_history().await {
            Ok(store) => match store.save_run(&summary).await {
                Ok(()) if !cmd.json => println!(
                    "{} Run saved to history (ID: {})",
                    INFO,
                    style(&summary.run_id.to_string()[..8]).dim()
                ),
                Ok(()) => {}
                Err(e) => warn!("Failed to save run history: {:#}", e),
            },
            Err(e) => warn!("Run history unavailable: {:#}", e),
        }
    }

    if let Some(path) = &cmd.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n{}", format_report(&report));
        let icon = if report.is_pass() { CHECK } else { CROSS };
        println!(
            "\n{} {} {}",
            icon,
            style(&report.pipeline).bold(),
            format_verdict(report.verdict)
        );
        if let Some(reason) = &report.cancellation {
            println!("  {}", style(reason).dim());
        }
        println!("  Logs: {}", style(log_dir.display()).dim());
    }

    if !report.is_pass() {
        error!("Pipeline '{}' did not pass: {}", report.pipeline, report.verdict);
    }
    Ok(report.exit_code())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    let Some(pipeline) = load_pipeline(&cmd.file) else {
        return Ok(EXIT_DEFINITION_ERROR);
    };

    let graph = match planning::GraphBuilder::build(&pipeline) {
        Ok(graph) => graph,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            return Ok(EXIT_DEFINITION_ERROR);
        }
    };

    if cmd.json {
        let data = serde_json::json!({
            "name": pipeline.name,
            "stages": graph.stages(),
            "execution_order": graph.execution_order(),
            "jobs": pipeline.job_count(),
            "gate": pipeline.gate,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Pipeline definition is valid!", CHECK);
        println!("  Name: {}", style(&pipeline.name).bold());
        println!("  Stages: {}", style(pipeline.stages.len()).cyan());
        println!("  Jobs: {}", style(pipeline.job_count()).cyan());
        println!("  Order: {}", graph.execution_order().join(" -> "));
        println!("  Gate: {}", pipeline.gate.tolerance);
    }
    Ok(0)
}

fn list_jobs(cmd: &ListJobsCommand) -> Result<i32> {
    let Some(pipeline) = load_pipeline(&cmd.file) else {
        return Ok(EXIT_DEFINITION_ERROR);
    };

    let graph = match planning::plan(&pipeline) {
        Ok(graph) => graph,
        Err(e) => {
            println!("{} {}", CROSS, style(e).red());
            return Ok(EXIT_DEFINITION_ERROR);
        }
    };

    if cmd.json {
        let jobs: Vec<_> = graph
            .jobs()
            .iter()
            .map(|job| {
                serde_json::json!({
                    "id": job.id,
                    "stage": job.stage,
                    "combination": job.combination,
                    "critical": job.critical,
                    "cacheable": job.cacheable,
                    "depends_on": job
                        .dependencies
                        .iter()
                        .map(|&d| graph.job(d).id.as_str())
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "jobs": jobs }))?);
    } else {
        println!(
            "{} {} expands into {} job(s):",
            INFO,
            style(&pipeline.name).bold(),
            graph.len()
        );
        println!("{}", format_job_list(&graph));
    }
    Ok(0)
}

async fn show_history(cmd: &HistoryCommand) -> Result<i32> {
    let store = open_history().await?;

    // If specific run ID is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Some(summary) => println!("{}", format_run_summary(&summary)),
            None => println!("{} Run not found", WARN),
        }
        return Ok(0);
    }

    let runs = store.list_runs(cmd.pipeline.as_deref(), cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(0);
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }
    Ok(0)
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Arc<dyn HistoryBackend>> {
    let store = pipeline_orchestrator::persistence::SqliteHistoryStore::with_default_path().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Arc<dyn HistoryBackend>> {
    Ok(Arc::new(pipeline_orchestrator::persistence::InMemoryHistory::new()))
}

/// `<data dir>/pipeline-orchestrator/logs/<pipeline>/<timestamp>`
fn default_log_dir(pipeline: &str) -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pipeline-orchestrator")
        .join("logs")
        .join(pipeline)
        .join(chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string())
}
