//! Entrypoint abstraction for trial execution.
//!
//! The [`Entrypoint`] trait decouples dispatch from what a trial actually
//! does. Library users pass closures; the CLI uses [`CommandEntrypoint`] to
//! run one external process per configuration.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use super::process::run_process;
use crate::core::types::RunContext;

pub const ENV_RUN_ID: &str = "SWEEP_RUN_ID";
pub const ENV_OUTPUT_DIR: &str = "SWEEP_OUTPUT_DIR";
pub const ENV_CONFIG: &str = "SWEEP_CONFIG";
pub const ENV_PARAM_PREFIX: &str = "SWEEP_PARAM_";

/// Default capture limit for command stdout/stderr logs.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;

/// One trial. Must write all artifacts under `ctx.output_dir` and return
/// `Err` only for unrecoverable conditions: an `Err` marks the run failed.
pub trait Entrypoint: Send + Sync {
    fn run(&self, ctx: &RunContext) -> Result<()>;
}

impl<F> Entrypoint for F
where
    F: Fn(&RunContext) -> Result<()> + Send + Sync,
{
    fn run(&self, ctx: &RunContext) -> Result<()> {
        self(ctx)
    }
}

/// Error returned when a run exceeded its time budget.
///
/// The dispatcher recognizes it and records the run as timed out rather
/// than failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTimedOut {
    pub timeout: Duration,
}

impl fmt::Display for RunTimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run timed out after {:.1}s", self.timeout.as_secs_f64())
    }
}

impl std::error::Error for RunTimedOut {}

/// Runs an external command once per configuration.
///
/// The child starts in the run directory. It receives the canonical config
/// JSON on stdin and in `SWEEP_CONFIG`, the run id in `SWEEP_RUN_ID`, the
/// directory in `SWEEP_OUTPUT_DIR`, and every field as
/// `SWEEP_PARAM_<NAME>`. Its output is kept in `stdout.log`/`stderr.log`.
#[derive(Debug, Clone)]
pub struct CommandEntrypoint {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
}

impl CommandEntrypoint {
    pub fn new(command: &[String]) -> Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("command must be a non-empty array");
        };
        if program.trim().is_empty() {
            bail!("command program must be non-empty");
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        })
    }

    /// Kill the child and fail the run once `timeout` elapses.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_output_limit(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    fn build_command(&self, ctx: &RunContext, config_json: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&ctx.output_dir)
            .env(ENV_RUN_ID, &ctx.run_id)
            .env(ENV_OUTPUT_DIR, &ctx.output_dir)
            .env(ENV_CONFIG, config_json);
        for (key, value) in ctx.config.iter() {
            cmd.env(param_env_name(key), value.to_string());
        }
        cmd
    }
}

impl Entrypoint for CommandEntrypoint {
    #[instrument(skip_all, fields(run_id = %ctx.run_id, program = %self.program))]
    fn run(&self, ctx: &RunContext) -> Result<()> {
        let config_json = ctx.config.canonical_json()?;
        let cmd = self.build_command(ctx, &config_json);
        debug!(args = ?self.args, "starting command");

        let output = run_process(
            cmd,
            Some(config_json.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run {}", self.program))?;

        let stdout_path = output_path(ctx, super::layout::STDOUT_LOG);
        let stderr_path = output_path(ctx, super::layout::STDERR_LOG);
        fs::write(&stdout_path, output.stdout_log())
            .with_context(|| format!("write {}", stdout_path.display()))?;
        fs::write(&stderr_path, output.stderr_log())
            .with_context(|| format!("write {}", stderr_path.display()))?;

        if output.timed_out
            && let Some(timeout) = self.timeout
        {
            return Err(RunTimedOut { timeout }.into());
        }
        if !output.status.success() {
            let tail = output.stderr_tail();
            match output.status.code() {
                Some(code) if tail.is_empty() => bail!("command exited with code {code}"),
                Some(code) => bail!("command exited with code {code}: {tail}"),
                None => bail!("command terminated by signal"),
            }
        }
        info!(exit_code = ?output.status.code(), "command finished");
        Ok(())
    }
}

fn output_path(ctx: &RunContext, name: &str) -> PathBuf {
    ctx.output_dir.join(name)
}

/// `SWEEP_PARAM_` followed by the upper-cased name, non-alphanumerics as `_`.
pub fn param_env_name(key: &str) -> String {
    let suffix: String = key
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_PARAM_PREFIX}{suffix}")
}
