//! CLI output formatting

use crate::core::{JobGraph, JobStatus};
use crate::execution::ExecutionEvent;
use crate::persistence::RunSummary;
use crate::report::{RunReport, Verdict};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static CACHED: Emoji<'_, '_> = Emoji("♻️  ", "= ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar counting finished jobs
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Whether an event marks a job as finished
pub fn finishes_job(event: &ExecutionEvent) -> bool {
    matches!(
        event,
        ExecutionEvent::JobCacheHit { .. }
            | ExecutionEvent::JobSucceeded { .. }
            | ExecutionEvent::JobFailed { .. }
            | ExecutionEvent::JobSkipped { .. }
            | ExecutionEvent::JobCancelled { .. }
    )
}

/// Format a job status for display
pub fn format_job_status(status: JobStatus) -> String {
    match status {
        JobStatus::Pending => style("PENDING").dim().to_string(),
        JobStatus::Ready => style("READY").dim().to_string(),
        JobStatus::Running => style("RUNNING").yellow().to_string(),
        JobStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        JobStatus::Failed => style("FAILED").red().to_string(),
        JobStatus::Skipped => style("SKIPPED").dim().to_string(),
        JobStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a verdict for display
pub fn format_verdict(verdict: Verdict) -> String {
    match verdict {
        Verdict::Pass => style("PASS").green().bold().to_string(),
        Verdict::Fail => style("FAIL").red().bold().to_string(),
        Verdict::FailCritical => style("FAIL (critical)").red().bold().to_string(),
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted { run_id, jobs } => format!(
            "{} Starting run {} with {} job(s)",
            ROCKET,
            style(&run_id.to_string()[..8]).dim(),
            style(jobs).cyan()
        ),
        ExecutionEvent::JobStarted { job_id } => format!("{} {}", SPINNER, style(job_id).cyan()),
        ExecutionEvent::JobCacheHit { job_id } => {
            format!("{} {} {}", CACHED, style(job_id).green(), style("(cached)").dim())
        }
        ExecutionEvent::JobSucceeded { job_id } => format!("{} {}", CHECK, style(job_id).green()),
        ExecutionEvent::JobFailed {
            job_id,
            kind,
            message,
        } => format!(
            "{} {} ({}): {}",
            CROSS,
            style(job_id).red(),
            kind,
            style(message).dim()
        ),
        ExecutionEvent::JobSkipped { job_id, because_of } => format!(
            "{} {} {}",
            SKIP,
            style(job_id).dim(),
            style(format!("(skipped: {} did not succeed)", because_of)).dim()
        ),
        ExecutionEvent::JobCancelled { job_id } => {
            format!("{} {} {}", WARN, style(job_id).yellow(), style("(cancelled)").dim())
        }
        ExecutionEvent::CancellationRequested { reason } => {
            format!("{} Cancelling run: {}", WARN, style(reason).yellow())
        }
        ExecutionEvent::CancellationOverdue { job_id } => format!(
            "{} {} is still running after the cancellation grace period",
            WARN,
            style(job_id).yellow()
        ),
        ExecutionEvent::RunFinished { run_id, verdict } => format!(
            "{} Run ({}) finished: {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_verdict(*verdict)
        ),
    }
}

/// Format the final report as a per-job table plus totals
pub fn format_report(report: &RunReport) -> String {
    let width = report
        .jobs
        .iter()
        .map(|r| r.job_id.len())
        .max()
        .unwrap_or(0);

    let mut lines = Vec::with_capacity(report.jobs.len() + 4);
    lines.push(format!("{} Results for {}", INFO, style(&report.pipeline).bold()));
    for record in &report.jobs {
        let mut line = format!(
            "  {:width$}  {}",
            record.job_id,
            format_job_status(record.status),
            width = width
        );
        if record.cached {
            line.push_str(&format!(" {}", style("(cached)").dim()));
        }
        if let Some(failure) = &record.failure {
            line.push_str(&format!(" {}", style(&failure.message).dim()));
        }
        if let Some(cause) = &record.skip_reason {
            line.push_str(&format!(" {}", style(format!("(after {})", cause)).dim()));
        }
        lines.push(line);
    }

    for warning in &report.warnings {
        let subject = warning.job_id.as_deref().unwrap_or("run");
        lines.push(format!("{} {}: {}", WARN, subject, warning.message));
    }

    lines.push(format!(
        "  {} succeeded ({} cached), {} failed, {} skipped, {} cancelled in {}",
        style(report.count(JobStatus::Succeeded)).green(),
        report.cached_count(),
        style(report.count(JobStatus::Failed)).red(),
        style(report.count(JobStatus::Skipped)).dim(),
        style(report.count(JobStatus::Cancelled)).yellow(),
        format_duration(report.duration())
    ));
    lines.join("\n")
}

/// Format the planned jobs of a pipeline
pub fn format_job_list(graph: &JobGraph) -> String {
    graph
        .jobs()
        .iter()
        .map(|job| {
            let deps: Vec<&str> = job
                .dependencies
                .iter()
                .map(|&d| graph.job(d).id.as_str())
                .collect();
            let mut line = format!("  {}", style(&job.id).cyan());
            if !job.critical {
                line.push_str(&format!(" {}", style("[non-critical]").dim()));
            }
            if !deps.is_empty() {
                line.push_str(&format!(" <- {}", deps.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let icon = match summary.verdict {
        Verdict::Pass => CHECK,
        _ => CROSS,
    };

    format!(
        "{} {} - {} - {} - {}/{} succeeded ({} cached) - {}",
        icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        format_verdict(summary.verdict),
        summary.succeeded,
        summary.total_jobs,
        summary.cached,
        style(summary.started_at.to_rfc3339()).dim()
    )
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}.{:01}s", secs, duration.subsec_millis() / 100)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
