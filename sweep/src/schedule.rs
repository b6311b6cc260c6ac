//! Execution strategies.
//!
//! A [`Schedule`] receives jobs in dispatch order and must return exactly one
//! report per job. The run-directory contract lives in [`Job::execute`], so any
//! strategy upholds it as long as it executes every job.

use std::sync::mpsc;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};

use crate::job::{Job, RunReport};

pub trait Schedule: Send + Sync {
    fn schedule(&self, jobs: Vec<Job>) -> Result<Vec<RunReport>>;
}

/// Runs jobs one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Schedule for Sequential {
    fn schedule(&self, jobs: Vec<Job>) -> Result<Vec<RunReport>> {
        Ok(jobs.into_iter().map(Job::execute).collect())
    }
}

/// Fixed-size thread pool. Jobs start in input order; completion order is
/// unconstrained.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    pub workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }
}

impl Schedule for WorkerPool {
    #[instrument(skip_all, fields(workers = self.workers, jobs = jobs.len()))]
    fn schedule(&self, jobs: Vec<Job>) -> Result<Vec<RunReport>> {
        if self.workers == 0 {
            bail!("worker pool needs at least one worker");
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|idx| format!("sweep-worker-{idx}"))
            .build()
            .context("build worker pool")?;

        let (tx, rx) = mpsc::channel();
        pool.scope_fifo(|scope| {
            for job in jobs {
                let tx = tx.clone();
                scope.spawn_fifo(move |_| {
                    let _ = tx.send(job.execute());
                });
            }
        });
        drop(tx);

        let reports: Vec<RunReport> = rx.into_iter().collect();
        debug!(reports = reports.len(), "worker pool drained");
        Ok(reports)
    }
}
