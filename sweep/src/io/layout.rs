//! On-disk layout of a results root.
//!
//! ```text
//! {results_root}/
//!   {run_id}/
//!     args.json    configuration snapshot, written before the entrypoint runs
//!     _SUCCESS     present only if the entrypoint returned Ok
//!     error.log    present only if the run failed
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::run_id::{NONCE_LEN, build_run_id};
use crate::core::types::Config;

pub const SNAPSHOT_FILE: &str = "args.json";
pub const SUCCESS_MARKER: &str = "_SUCCESS";
pub const ERROR_LOG: &str = "error.log";
pub const STDOUT_LOG: &str = "stdout.log";
pub const STDERR_LOG: &str = "stderr.log";

const MAX_ALLOCATION_ATTEMPTS: usize = 8;

/// Canonical paths within one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub snapshot_path: PathBuf,
    pub marker_path: PathBuf,
    pub error_path: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

impl RunPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            snapshot_path: dir.join(SNAPSHOT_FILE),
            marker_path: dir.join(SUCCESS_MARKER),
            error_path: dir.join(ERROR_LOG),
            stdout_path: dir.join(STDOUT_LOG),
            stderr_path: dir.join(STDERR_LOG),
            dir,
        }
    }

    pub fn for_run(results_root: &Path, run_id: &str) -> Self {
        Self::new(results_root.join(run_id))
    }

    pub fn is_completed(&self) -> bool {
        self.marker_path.is_file()
    }
}

/// Persisted configuration snapshot (`args.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub created_at: String,
    /// SHA-256 of the canonical configuration at dispatch time.
    pub content_hash: String,
    pub config: Config,
}

/// Create a fresh, uniquely named run directory under `results_root`.
///
/// Directory creation is exclusive; a name collision draws a new nonce.
pub fn allocate_run_dir(results_root: &Path, config: &Config) -> Result<(String, RunPaths)> {
    let content_hash = config.content_hash()?;
    for _ in 0..MAX_ALLOCATION_ATTEMPTS {
        let run_id = build_run_id(&generate_timestamp(), &content_hash, &generate_nonce());
        let paths = RunPaths::for_run(results_root, &run_id);
        match fs::create_dir(&paths.dir) {
            Ok(()) => {
                debug!(run_id, "run directory allocated");
                return Ok((run_id, paths));
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!(run_id, "run id collision, retrying");
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("create run directory {}", paths.dir.display()));
            }
        }
    }
    bail!(
        "could not allocate a unique run directory under {} after {} attempts",
        results_root.display(),
        MAX_ALLOCATION_ATTEMPTS
    )
}

pub fn write_snapshot(paths: &RunPaths, snapshot: &RunSnapshot) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;
    buf.push('\n');
    write_atomic(&paths.snapshot_path, &buf)
}

pub fn load_snapshot(path: &Path) -> Result<RunSnapshot> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse snapshot {}", path.display()))
}

/// Write the success marker. Its contents are the completion time.
pub fn write_marker(paths: &RunPaths) -> Result<()> {
    let stamp = format!("{}\n", Utc::now().to_rfc3339());
    fs::write(&paths.marker_path, stamp)
        .with_context(|| format!("write marker {}", paths.marker_path.display()))
}

pub fn write_error_log(paths: &RunPaths, message: &str) -> Result<()> {
    fs::write(&paths.error_path, format!("{}\n", message.trim_end()))
        .with_context(|| format!("write error log {}", paths.error_path.display()))
}

/// Immediate subdirectories of `results_root`, sorted. Missing root → empty.
pub fn list_run_dirs(results_root: &Path) -> Result<Vec<PathBuf>> {
    if !results_root.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(results_root)
        .with_context(|| format!("read {}", results_root.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Create `results_root` if needed and verify it accepts writes.
pub fn ensure_writable_root(results_root: &Path) -> Result<()> {
    fs::create_dir_all(results_root)
        .with_context(|| format!("create results root {}", results_root.display()))?;
    let probe = results_root.join(format!(".sweep-probe-{}", generate_nonce()));
    fs::write(&probe, b"")
        .with_context(|| format!("results root {} is not writable", results_root.display()))?;
    fs::remove_file(&probe).with_context(|| format!("remove probe {}", probe.display()))?;
    Ok(())
}

pub fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn generate_nonce() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(NONCE_LEN)
        .collect::<String>()
        .to_lowercase()
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("snapshot path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp snapshot {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace snapshot {}", path.display()))?;
    Ok(())
}
