//! Run dispatcher: turns configurations into run directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::types::Config;
use crate::io::entrypoint::Entrypoint;
use crate::io::layout::ensure_writable_root;
use crate::job::{CancelToken, Job, RunReport, RunStatus};
use crate::schedule::{Schedule, Sequential, WorkerPool};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel { workers: usize },
}

/// Counts and per-run reports for one dispatched batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    /// Failed or timed out.
    pub failed: usize,
    pub cancelled: usize,
    /// Sorted by input index.
    pub reports: Vec<RunReport>,
}

impl BatchSummary {
    fn from_reports(mut reports: Vec<RunReport>) -> Self {
        reports.sort_by_key(|report| report.index);
        let count = |pred: fn(&RunStatus) -> bool| {
            reports.iter().filter(|report| pred(&report.status)).count()
        };
        Self {
            total: reports.len(),
            completed: count(RunStatus::is_completed),
            failed: count(RunStatus::is_failure),
            cancelled: count(|status| matches!(status, RunStatus::Cancelled)),
            reports,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.failed
    }

    /// True when every run completed.
    pub fn is_success(&self) -> bool {
        self.completed == self.total
    }
}

/// Dispatches configurations to an entrypoint, one fresh run directory each.
///
/// Per-run failures never abort the batch; they are counted in the returned
/// [`BatchSummary`]. `Err` is reserved for problems that prevent dispatch
/// altogether (unusable results root, worker pool creation).
pub struct Dispatcher {
    results_root: PathBuf,
    entrypoint: Arc<dyn Entrypoint>,
    mode: ExecutionMode,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("results_root", &self.results_root)
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(results_root: impl Into<PathBuf>, entrypoint: impl Entrypoint + 'static) -> Self {
        Self::with_shared(results_root, Arc::new(entrypoint))
    }

    /// Like [`Dispatcher::new`] for an entrypoint the caller keeps a handle to.
    pub fn with_shared(results_root: impl Into<PathBuf>, entrypoint: Arc<dyn Entrypoint>) -> Self {
        Self {
            results_root: results_root.into(),
            entrypoint,
            mode: ExecutionMode::Sequential,
            timeout: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Per-run wall-clock budget. Runs over budget are recorded as timed out.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn results_root(&self) -> &Path {
        &self.results_root
    }

    /// Bind configurations to jobs in input order.
    pub fn jobs(&self, configs: Vec<Config>) -> Vec<Job> {
        configs
            .into_iter()
            .enumerate()
            .map(|(index, config)| {
                Job::new(
                    index,
                    config,
                    self.results_root.clone(),
                    Arc::clone(&self.entrypoint),
                    self.timeout,
                    self.cancel.clone(),
                )
            })
            .collect()
    }

    /// Dispatch with the configured [`ExecutionMode`].
    pub fn run(&self, configs: Vec<Config>) -> Result<BatchSummary> {
        match self.mode {
            ExecutionMode::Sequential => self.run_with(configs, &Sequential),
            ExecutionMode::Parallel { workers } => {
                self.run_with(configs, &WorkerPool::new(workers))
            }
        }
    }

    /// Dispatch with a caller-supplied strategy.
    #[instrument(skip_all, fields(results_root = %self.results_root.display(), configs = configs.len()))]
    pub fn run_with(&self, configs: Vec<Config>, schedule: &dyn Schedule) -> Result<BatchSummary> {
        ensure_writable_root(&self.results_root)?;
        let total = configs.len();
        let reports = schedule.schedule(self.jobs(configs))?;
        if reports.len() != total {
            bail!(
                "schedule returned {} reports for {} jobs",
                reports.len(),
                total
            );
        }
        let summary = BatchSummary::from_reports(reports);
        info!(
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "batch finished"
        );
        Ok(summary)
    }
}
