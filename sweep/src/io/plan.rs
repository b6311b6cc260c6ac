//! Sweep plan files (TOML).
//!
//! A plan names a base configuration, the expansion steps applied to it, the
//! command to run per configuration, and how runs are executed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::entrypoint::{CommandEntrypoint, DEFAULT_OUTPUT_LIMIT_BYTES};
use crate::core::expand::VariantMode;
use crate::core::space::ParamSpace;
use crate::core::types::{Config, Scalar};
use crate::dispatch::ExecutionMode;
use crate::expand::ConfigSpace;

/// Sweep plan (TOML).
///
/// Intended to be edited by hand. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Plan {
    /// Directory holding one subdirectory per run. Relative paths resolve
    /// against the plan file's directory.
    pub results_root: PathBuf,

    /// Command executed once per configuration (e.g. `["python","train.py"]`).
    pub command: Vec<String>,

    /// Shuffle the expanded list with this seed before dispatch.
    pub shuffle_seed: Option<u64>,

    /// Skip configurations that already completed under `results_root`.
    pub resume: bool,

    /// Fields ignored when matching against completed runs.
    pub ignore_keys: Vec<String>,

    pub base: Config,

    pub expand: Vec<ExpandStep>,

    pub execution: ExecutionConfig,
}

/// One `[[expand]]` block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpandStep {
    pub kind: ExpandKind,
    #[serde(default)]
    pub mode: VariantMode,
    #[serde(default)]
    pub keep_base: bool,
    #[serde(default)]
    pub params: BTreeMap<String, Vec<Scalar>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpandKind {
    Grid,
    Variants,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModeName {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub mode: ModeName,

    /// Worker threads in parallel mode.
    pub workers: usize,

    /// Per-run wall-clock budget in seconds; 0 disables the timeout.
    pub timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ModeName::Sequential,
            workers: 4,
            timeout_secs: 0,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl ExecutionConfig {
    pub fn execution_mode(&self) -> ExecutionMode {
        match self.mode {
            ModeName::Sequential => ExecutionMode::Sequential,
            ModeName::Parallel => ExecutionMode::Parallel {
                workers: self.workers,
            },
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            results_root: PathBuf::from("results"),
            command: Vec::new(),
            shuffle_seed: None,
            resume: true,
            ignore_keys: Vec::new(),
            base: Config::new(),
            expand: Vec::new(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl Plan {
    pub fn validate(&self) -> Result<()> {
        if self.results_root.as_os_str().is_empty() {
            return Err(anyhow!("results_root must be non-empty"));
        }
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(anyhow!("command must be a non-empty array"));
        }
        if self.execution.mode == ModeName::Parallel && self.execution.workers == 0 {
            return Err(anyhow!("execution.workers must be > 0"));
        }
        if self.execution.output_limit_bytes == 0 {
            return Err(anyhow!("execution.output_limit_bytes must be > 0"));
        }
        for (idx, step) in self.expand.iter().enumerate() {
            if step.kind == ExpandKind::Grid && (step.keep_base || step.mode != VariantMode::default())
            {
                return Err(anyhow!(
                    "expand[{idx}]: mode and keep_base apply to variants only"
                ));
            }
        }
        Ok(())
    }

    /// `results_root` resolved against `plan_dir` when relative.
    pub fn results_root_in(&self, plan_dir: &Path) -> PathBuf {
        if self.results_root.is_absolute() {
            self.results_root.clone()
        } else {
            plan_dir.join(&self.results_root)
        }
    }

    /// Expansion pipeline described by this plan, rooted at `results_root`.
    pub fn config_space(&self, results_root: &Path) -> ConfigSpace {
        let mut space = ConfigSpace::new(self.base.clone());
        for step in &self.expand {
            let params = ParamSpace::from(step.params.clone());
            space = match (step.kind, step.keep_base) {
                (ExpandKind::Grid, _) => space.add_grid_search(params),
                (ExpandKind::Variants, false) => space.add_variants_with(params, step.mode),
                (ExpandKind::Variants, true) => {
                    space.add_variants_keeping_base_with(params, step.mode)
                }
            };
        }
        if let Some(seed) = self.shuffle_seed {
            space = space.shuffle(Some(seed));
        }
        if self.resume {
            space = space.filter_completed_ignoring(results_root, &self.ignore_keys);
        }
        space
    }

    pub fn entrypoint(&self) -> Result<CommandEntrypoint> {
        let mut entrypoint = CommandEntrypoint::new(&self.command)?
            .with_output_limit(self.execution.output_limit_bytes);
        if let Some(timeout) = self.execution.timeout() {
            entrypoint = entrypoint.with_timeout(timeout);
        }
        Ok(entrypoint)
    }
}

/// Load and validate a plan from a TOML file.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let plan: Plan =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    plan.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(plan)
}

/// Atomically write a plan to disk (temp file + rename).
pub fn write_plan(path: &Path, plan: &Plan) -> Result<()> {
    plan.validate()?;
    let mut buf = toml::to_string_pretty(plan).context("serialize plan toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("plan path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp plan {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace plan {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PLAN: &str = r#"
results_root = "results"
command = ["python", "train.py"]
shuffle_seed = 7

[base]
lr = 0.1

[[expand]]
kind = "grid"
[expand.params]
batch = [8, 16]

[[expand]]
kind = "variants"
[expand.params]
seed = [1, 2]

[execution]
mode = "parallel"
workers = 2
timeout_secs = 30
"#;

    fn plan() -> Plan {
        toml::from_str(PLAN).expect("parse plan")
    }

    #[test]
    fn parses_full_plan() {
        let plan = plan();
        plan.validate().expect("valid");
        assert_eq!(plan.base.get_f64("lr"), Some(0.1));
        assert_eq!(plan.expand.len(), 2);
        assert_eq!(plan.expand[0].kind, ExpandKind::Grid);
        assert_eq!(plan.expand[1].mode, VariantMode::Independent);
        assert!(plan.resume);
        assert_eq!(
            plan.execution.execution_mode(),
            ExecutionMode::Parallel { workers: 2 }
        );
        assert_eq!(plan.execution.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_timeout_means_none() {
        assert_eq!(ExecutionConfig::default().timeout(), None);
    }

    #[test]
    fn plan_expands_in_step_order() {
        let temp = tempdir().expect("tempdir");
        let mut plan = plan();
        plan.shuffle_seed = None;
        let configs = plan
            .config_space(&temp.path().join("results"))
            .get_configs()
            .expect("expand");
        let pairs: Vec<(i64, i64)> = configs
            .iter()
            .map(|c| (c.get_i64("batch").unwrap(), c.get_i64("seed").unwrap()))
            .collect();
        assert_eq!(pairs, vec![(8, 1), (8, 2), (16, 1), (16, 2)]);
    }

    #[test]
    fn rejects_missing_command() {
        let plan: Plan = toml::from_str("results_root = \"r\"").expect("parse");
        let err = plan.validate().expect_err("invalid");
        assert!(err.to_string().contains("command"));
    }

    #[test]
    fn rejects_variant_options_on_grid() {
        let mut plan = plan();
        plan.expand[0].keep_base = true;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn relative_results_root_resolves_against_plan_dir() {
        let plan = plan();
        assert_eq!(
            plan.results_root_in(Path::new("/work/exp")),
            PathBuf::from("/work/exp/results")
        );
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("sweep.toml");
        let plan = plan();
        write_plan(&path, &plan).expect("write");
        let loaded = load_plan(&path).expect("load");
        assert_eq!(loaded, plan);
    }
}
