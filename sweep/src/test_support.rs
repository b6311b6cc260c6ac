//! Test-only helpers for building results roots and scripted entrypoints.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};

use crate::core::types::{Config, RunContext, Scalar};
use crate::io::entrypoint::Entrypoint;
use crate::io::layout::{RunPaths, RunSnapshot, write_marker, write_snapshot};

/// Write a run directory with a snapshot and the success marker.
pub fn write_completed_run(root: &Path, name: &str, config: &Config) -> Result<RunPaths> {
    let paths = write_incomplete_run(root, name, config)?;
    write_marker(&paths)?;
    Ok(paths)
}

/// Write a run directory with a snapshot but no success marker.
pub fn write_incomplete_run(root: &Path, name: &str, config: &Config) -> Result<RunPaths> {
    let paths = RunPaths::for_run(root, name);
    fs::create_dir_all(&paths.dir).with_context(|| format!("create {}", paths.dir.display()))?;
    let snapshot = RunSnapshot {
        run_id: name.to_string(),
        created_at: "2026-01-18T12:00:00+00:00".to_string(),
        content_hash: config.content_hash()?,
        config: config.clone(),
    };
    write_snapshot(&paths, &snapshot)?;
    Ok(paths)
}

/// Entrypoint that records every context it sees, writes `results.json`, and
/// fails for configurations whose `key` equals `value`.
#[derive(Debug, Default)]
pub struct ScriptedEntrypoint {
    fail_on: Option<(String, Scalar)>,
    seen: Mutex<Vec<RunContext>>,
}

impl ScriptedEntrypoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(
        key: impl Into<String>,
        value: impl Into<Scalar>,
    ) -> Self {
        Self {
            fail_on: Some((key.into(), value.into())),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Contexts in invocation order.
    pub fn seen(&self) -> Vec<RunContext> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

impl Entrypoint for ScriptedEntrypoint {
    fn run(&self, ctx: &RunContext) -> Result<()> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(ctx.clone());
        }
        if let Some((key, value)) = &self.fail_on
            && ctx.config.get(key) == Some(value)
        {
            bail!("scripted failure for {key}={value}");
        }
        let results = serde_json::json!({ "score": ctx.config.len() });
        fs::write(ctx.output_dir.join("results.json"), results.to_string())
            .context("write results.json")?;
        Ok(())
    }
}
