//! Completion oracle: has this configuration already run successfully?
//!
//! A run counts as completed only when its directory holds both a readable
//! `args.json` snapshot and the `_SUCCESS` marker. Matching is by canonical
//! configuration content, never by run id. Read-only.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, instrument, warn};

use super::layout::{RunPaths, RunSnapshot, list_run_dirs, load_snapshot};
use crate::core::types::Config;

/// One directory found under a results root.
#[derive(Debug, Clone)]
pub struct ScannedRun {
    pub dir: PathBuf,
    /// `None` when `args.json` is missing or unreadable.
    pub snapshot: Option<RunSnapshot>,
    pub completed: bool,
    /// Why the snapshot could not be loaded, if it exists but is invalid.
    pub snapshot_error: Option<String>,
}

/// Scan every immediate subdirectory of `results_root`.
#[instrument(skip_all, fields(results_root = %results_root.display()))]
pub fn scan_runs(results_root: &Path) -> Result<Vec<ScannedRun>> {
    let mut runs = Vec::new();
    for dir in list_run_dirs(results_root)? {
        let paths = RunPaths::new(&dir);
        let completed = paths.is_completed();
        let (snapshot, snapshot_error) = if paths.snapshot_path.exists() {
            match load_snapshot(&paths.snapshot_path) {
                Ok(snapshot) => (Some(snapshot), None),
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn!(dir = %dir.display(), err = %reason, "skipping unreadable snapshot");
                    (None, Some(reason))
                }
            }
        } else {
            (None, None)
        };
        runs.push(ScannedRun {
            dir,
            snapshot,
            completed,
            snapshot_error,
        });
    }
    debug!(runs = runs.len(), "results root scanned");
    Ok(runs)
}

/// Completion counts for a results root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub runs: usize,
    /// Snapshot and marker present.
    pub completed: usize,
    /// Readable or missing snapshot, no marker.
    pub incomplete: usize,
    /// `args.json` present but unparseable.
    pub unreadable: usize,
}

impl RunCounts {
    pub fn from_runs(runs: &[ScannedRun]) -> Self {
        let mut counts = RunCounts {
            runs: runs.len(),
            ..RunCounts::default()
        };
        for run in runs {
            if run.snapshot_error.is_some() {
                counts.unreadable += 1;
            } else if run.completed && run.snapshot.is_some() {
                counts.completed += 1;
            } else {
                counts.incomplete += 1;
            }
        }
        counts
    }
}

/// Count completed, incomplete, and unreadable runs under `results_root`.
pub fn run_counts(results_root: &Path) -> Result<RunCounts> {
    Ok(RunCounts::from_runs(&scan_runs(results_root)?))
}

/// Canonical forms of every completed configuration under a results root.
///
/// Built once before dispatch; later runs in the same batch are not seen.
#[derive(Debug, Clone, Default)]
pub struct CompletionIndex {
    canonical: HashSet<String>,
    ignore_keys: Vec<String>,
}

impl CompletionIndex {
    pub fn scan(results_root: &Path) -> Result<Self> {
        Self::scan_ignoring(results_root, &[])
    }

    /// Like [`CompletionIndex::scan`], comparing configurations without `ignore_keys`.
    pub fn scan_ignoring(results_root: &Path, ignore_keys: &[String]) -> Result<Self> {
        let mut canonical = HashSet::new();
        for run in scan_runs(results_root)? {
            if !run.completed {
                continue;
            }
            if let Some(snapshot) = run.snapshot {
                canonical.insert(snapshot.config.canonical_json_without(ignore_keys)?);
            }
        }
        Ok(Self {
            canonical,
            ignore_keys: ignore_keys.to_vec(),
        })
    }

    pub fn contains(&self, config: &Config) -> Result<bool> {
        Ok(self
            .canonical
            .contains(&config.canonical_json_without(&self.ignore_keys)?))
    }

    /// Number of distinct completed configurations.
    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

/// True if `config` matches a completed run under `results_root`.
pub fn is_completed(results_root: &Path, config: &Config) -> Result<bool> {
    CompletionIndex::scan(results_root)?.contains(config)
}
