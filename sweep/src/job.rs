//! One unit of dispatched work and its outcome.
//!
//! [`Job::execute`] owns the on-disk contract: allocate a fresh run
//! directory, snapshot the configuration, invoke the entrypoint, then write
//! either `_SUCCESS` or `error.log`. Schedules only decide where and when
//! jobs execute.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::types::{Config, RunContext};
use crate::io::entrypoint::{Entrypoint, RunTimedOut};
use crate::io::layout::{
    RunPaths, RunSnapshot, allocate_run_dir, write_error_log, write_marker, write_snapshot,
};

/// Shared cancellation flag. Jobs that have not started when it is set are
/// reported as cancelled; running jobs finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed { error: String },
    TimedOut { timeout_secs: f64 },
    Cancelled,
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }

    /// Failed or timed out.
    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Failed { .. } | RunStatus::TimedOut { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Position of the configuration in the dispatched list.
    pub index: usize,
    /// `None` when no run directory was created.
    pub run_id: Option<String>,
    pub output_dir: Option<PathBuf>,
    #[serde(flatten)]
    pub status: RunStatus,
    pub duration_secs: f64,
}

/// A configuration bound to everything needed to run it.
pub struct Job {
    pub index: usize,
    pub config: Config,
    results_root: PathBuf,
    entrypoint: Arc<dyn Entrypoint>,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("index", &self.index)
            .field("config", &self.config)
            .field("results_root", &self.results_root)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

enum Outcome {
    Success,
    Failed(anyhow::Error),
    TimedOut(Duration),
}

impl Job {
    pub(crate) fn new(
        index: usize,
        config: Config,
        results_root: PathBuf,
        entrypoint: Arc<dyn Entrypoint>,
        timeout: Option<Duration>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            index,
            config,
            results_root,
            entrypoint,
            timeout,
            cancel,
        }
    }

    /// Run this job to completion. Never panics on entrypoint failure and
    /// never returns an error: every outcome is a [`RunReport`].
    pub fn execute(self) -> RunReport {
        let started = Instant::now();
        if self.cancel.is_cancelled() {
            debug!(index = self.index, "job cancelled before start");
            return self.report(None, RunStatus::Cancelled, started);
        }

        let (run_id, paths) = match self.prepare() {
            Ok(prepared) => prepared,
            Err(err) => {
                let error = format!("{err:#}");
                warn!(index = self.index, error = %error, "could not prepare run directory");
                return self.report(None, RunStatus::Failed { error }, started);
            }
        };

        let ctx = RunContext {
            config: self.config.clone(),
            run_id: run_id.clone(),
            output_dir: paths.dir.clone(),
        };
        let status = match self.invoke(ctx) {
            Outcome::Success => match write_marker(&paths) {
                Ok(()) => {
                    info!(run_id = %run_id, "run completed");
                    RunStatus::Completed
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(run_id = %run_id, error = %error, "run finished but marker failed");
                    RunStatus::Failed { error }
                }
            },
            Outcome::Failed(err) => {
                let error = format!("{err:#}");
                record_error(&paths, &run_id, &format!("{err:?}"));
                warn!(run_id = %run_id, error = %error, "run failed");
                RunStatus::Failed { error }
            }
            Outcome::TimedOut(timeout) => {
                let message = RunTimedOut { timeout }.to_string();
                record_error(&paths, &run_id, &message);
                warn!(run_id = %run_id, timeout_secs = timeout.as_secs_f64(), "run timed out");
                RunStatus::TimedOut {
                    timeout_secs: timeout.as_secs_f64(),
                }
            }
        };
        self.report(Some((run_id, paths)), status, started)
    }

    fn prepare(&self) -> Result<(String, RunPaths)> {
        let (run_id, paths) = allocate_run_dir(&self.results_root, &self.config)?;
        let snapshot = RunSnapshot {
            run_id: run_id.clone(),
            created_at: Utc::now().to_rfc3339(),
            content_hash: self.config.content_hash()?,
            config: self.config.clone(),
        };
        write_snapshot(&paths, &snapshot)?;
        Ok((run_id, paths))
    }

    fn invoke(&self, ctx: RunContext) -> Outcome {
        let result = match self.timeout {
            None => catch_unwind(AssertUnwindSafe(|| self.entrypoint.run(&ctx))),
            Some(timeout) => match self.invoke_with_deadline(ctx, timeout) {
                Some(result) => result,
                None => return Outcome::TimedOut(timeout),
            },
        };
        match result {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(err)) => match err.downcast_ref::<RunTimedOut>() {
                Some(timed_out) => Outcome::TimedOut(timed_out.timeout),
                None => Outcome::Failed(err),
            },
            Err(payload) => {
                Outcome::Failed(anyhow!("worker crash: {}", panic_message(payload.as_ref())))
            }
        }
    }

    /// Run the entrypoint on its own thread. `None` if it missed the
    /// deadline; the thread is abandoned and its late result discarded.
    fn invoke_with_deadline(
        &self,
        ctx: RunContext,
        timeout: Duration,
    ) -> Option<thread::Result<Result<()>>> {
        let (tx, rx) = mpsc::channel();
        let entrypoint = Arc::clone(&self.entrypoint);
        let spawned = thread::Builder::new()
            .name(format!("sweep-run-{}", self.index))
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| entrypoint.run(&ctx)));
                let _ = tx.send(result);
            });
        if let Err(err) = spawned {
            return Some(Ok(Err(anyhow::Error::new(err).context("spawn run thread"))));
        }
        match rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Ok(Err(anyhow!(
                "worker crash: run thread exited without a result"
            )))),
        }
    }

    fn report(
        &self,
        run: Option<(String, RunPaths)>,
        status: RunStatus,
        started: Instant,
    ) -> RunReport {
        let (run_id, output_dir) = match run {
            Some((run_id, paths)) => (Some(run_id), Some(paths.dir)),
            None => (None, None),
        };
        RunReport {
            index: self.index,
            run_id,
            output_dir,
            status,
            duration_secs: started.elapsed().as_secs_f64(),
        }
    }
}

fn record_error(paths: &RunPaths, run_id: &str, message: &str) {
    if let Err(err) = write_error_log(paths, message) {
        let reason = format!("{err:#}");
        warn!(run_id, error = %reason, "could not write error log");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
