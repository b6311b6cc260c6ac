//! `sweep`: expand a plan file into configurations and run them.
//!
//! Each configuration runs the plan's command in its own directory under the
//! results root. Re-running a plan skips configurations whose runs already
//! carry a `_SUCCESS` marker.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;

use sweep::dispatch::{BatchSummary, Dispatcher};
use sweep::exit_codes;
use sweep::io::oracle::run_counts;
use sweep::io::plan::{ModeName, Plan, load_plan};
use sweep::job::RunStatus;
use sweep::logging;

#[derive(Parser)]
#[command(
    name = "sweep",
    version,
    about = "Parameter sweep expansion and resumable dispatch"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the configurations a plan expands to, one canonical JSON per line.
    Plan { plan: PathBuf },
    /// Expand a plan and run every remaining configuration.
    Run {
        plan: PathBuf,
        /// Override `execution.mode`.
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Override `execution.workers`.
        #[arg(long)]
        workers: Option<usize>,
        /// Override `execution.timeout_secs` (0 disables the timeout).
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Run every configuration even if a completed run exists.
        #[arg(long)]
        no_resume: bool,
    },
    /// Count completed and incomplete runs under a results root.
    Status { results_root: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Sequential,
    Parallel,
}

impl From<ModeArg> for ModeName {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sequential => ModeName::Sequential,
            ModeArg::Parallel => ModeName::Parallel,
        }
    }
}

struct RunOverrides {
    mode: Option<ModeArg>,
    workers: Option<usize>,
    timeout_secs: Option<u64>,
    no_resume: bool,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Plan { plan } => cmd_plan(&plan),
        Command::Run {
            plan,
            mode,
            workers,
            timeout_secs,
            no_resume,
        } => cmd_run(
            &plan,
            RunOverrides {
                mode,
                workers,
                timeout_secs,
                no_resume,
            },
        ),
        Command::Status { results_root } => cmd_status(&results_root),
    }
}

fn load(plan_path: &Path) -> Result<(Plan, PathBuf)> {
    let plan = load_plan(plan_path).context("load plan")?;
    let plan_dir = plan_path.parent().unwrap_or_else(|| Path::new("."));
    let results_root = std::path::absolute(plan.results_root_in(plan_dir))
        .context("resolve results_root")?;
    debug!(results_root = %results_root.display(), "plan loaded");
    Ok((plan, results_root))
}

fn cmd_plan(plan_path: &Path) -> Result<i32> {
    let (plan, results_root) = load(plan_path)?;
    let expansion = plan.config_space(&results_root).expand()?;
    for config in &expansion.configs {
        println!("{}", config.canonical_json()?);
    }
    eprintln!(
        "plan: generated={} filtered={} already_completed={} remaining={}",
        expansion.generated,
        expansion.filtered,
        expansion.already_completed,
        expansion.configs.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_run(plan_path: &Path, overrides: RunOverrides) -> Result<i32> {
    let (mut plan, results_root) = load(plan_path)?;
    if let Some(mode) = overrides.mode {
        plan.execution.mode = mode.into();
    }
    if let Some(workers) = overrides.workers {
        plan.execution.workers = workers;
    }
    if let Some(timeout_secs) = overrides.timeout_secs {
        plan.execution.timeout_secs = timeout_secs;
    }
    if overrides.no_resume {
        plan.resume = false;
    }
    plan.validate().context("validate overrides")?;

    let expansion = plan.config_space(&results_root).expand()?;
    println!(
        "run: results_root={} generated={} already_completed={} dispatching={}",
        results_root.display(),
        expansion.generated,
        expansion.already_completed,
        expansion.configs.len()
    );

    // The command entrypoint enforces the timeout itself so it can kill the child.
    let summary = Dispatcher::new(&results_root, plan.entrypoint()?)
        .mode(plan.execution.execution_mode())
        .run(expansion.configs)?;
    print_summary(&summary);
    Ok(batch_exit_code(&summary))
}

/// Anything short of every run completing, cancellations included, is a failure.
fn batch_exit_code(summary: &BatchSummary) -> i32 {
    if summary.is_success() {
        exit_codes::OK
    } else {
        exit_codes::FAILURES
    }
}

fn print_summary(summary: &BatchSummary) {
    for report in &summary.reports {
        let run_id = report.run_id.as_deref().unwrap_or("-");
        match &report.status {
            RunStatus::Completed => println!(
                "run: index={} run_id={} status=completed duration_secs={:.2}",
                report.index, run_id, report.duration_secs
            ),
            RunStatus::Failed { error } => println!(
                "run: index={} run_id={} status=failed error={}",
                report.index, run_id, error
            ),
            RunStatus::TimedOut { timeout_secs } => println!(
                "run: index={} run_id={} status=timed_out timeout_secs={}",
                report.index, run_id, timeout_secs
            ),
            RunStatus::Cancelled => {
                println!("run: index={} status=cancelled", report.index);
            }
        }
    }
    println!(
        "summary: total={} completed={} failed={} cancelled={}",
        summary.total, summary.completed, summary.failed, summary.cancelled
    );
}

fn cmd_status(results_root: &Path) -> Result<i32> {
    let counts = run_counts(results_root)?;
    println!(
        "status: runs={} completed={} incomplete={} unreadable={}",
        counts.runs, counts.completed, counts.incomplete, counts.unreadable
    );
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep::job::RunReport;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "sweep",
            "run",
            "sweep.toml",
            "--mode",
            "parallel",
            "--workers",
            "3",
            "--no-resume",
        ]);
        match cli.command {
            Command::Run {
                plan,
                mode,
                workers,
                timeout_secs,
                no_resume,
            } => {
                assert_eq!(plan, PathBuf::from("sweep.toml"));
                assert_eq!(mode, Some(ModeArg::Parallel));
                assert_eq!(workers, Some(3));
                assert_eq!(timeout_secs, None);
                assert!(no_resume);
            }
            _ => panic!("expected run"),
        }
    }

    fn summary(statuses: Vec<RunStatus>) -> BatchSummary {
        let reports: Vec<RunReport> = statuses
            .into_iter()
            .enumerate()
            .map(|(index, status)| RunReport {
                index,
                run_id: None,
                output_dir: None,
                status,
                duration_secs: 0.0,
            })
            .collect();
        BatchSummary {
            total: reports.len(),
            completed: reports.iter().filter(|r| r.status.is_completed()).count(),
            failed: reports.iter().filter(|r| r.status.is_failure()).count(),
            cancelled: reports
                .iter()
                .filter(|r| matches!(r.status, RunStatus::Cancelled))
                .count(),
            reports,
        }
    }

    #[test]
    fn cancelled_runs_make_the_batch_fail() {
        let done = summary(vec![RunStatus::Completed, RunStatus::Completed]);
        assert_eq!(batch_exit_code(&done), exit_codes::OK);
        let cancelled = summary(vec![RunStatus::Completed, RunStatus::Cancelled]);
        assert_eq!(batch_exit_code(&cancelled), exit_codes::FAILURES);
        let failed = summary(vec![RunStatus::Failed {
            error: "boom".to_string(),
        }]);
        assert_eq!(batch_exit_code(&failed), exit_codes::FAILURES);
        assert_eq!(batch_exit_code(&summary(Vec::new())), exit_codes::OK);
    }

    #[test]
    fn parse_status() {
        let cli = Cli::parse_from(["sweep", "status", "results"]);
        assert!(matches!(cli.command, Command::Status { .. }));
    }
}
