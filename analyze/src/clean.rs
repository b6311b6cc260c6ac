//! Cleanup of run directories.
//!
//! Planning is separate from deletion: [`plan_clean`] only lists targets, and
//! nothing is removed until [`CleanPlan::execute`] is called.

use std::fmt;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use tracing::{info, warn};

use sweep::io::oracle::scan_runs;

/// Cleanup filter: receives the persisted config fields, `true` deletes.
pub type ConfigFilter = Box<dyn Fn(&Map<String, Value>) -> bool>;

#[derive(Default)]
pub struct CleanCriteria {
    /// Select directories without a `_SUCCESS` marker.
    pub incomplete: bool,
    /// Applied to directories not already selected as incomplete.
    pub filter: Option<ConfigFilter>,
}

impl fmt::Debug for CleanCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanCriteria")
            .field("incomplete", &self.incomplete)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanReason {
    Incomplete,
    FilterMatch,
}

impl fmt::Display for CleanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanReason::Incomplete => f.write_str("incomplete"),
            CleanReason::FilterMatch => f.write_str("filter_match"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanTarget {
    pub dir: PathBuf,
    pub reason: CleanReason,
}

/// Directories selected for deletion, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanPlan {
    pub targets: Vec<CleanTarget>,
}

#[derive(Debug, Default)]
pub struct CleanOutcome {
    pub deleted: Vec<PathBuf>,
    pub errors: Vec<(PathBuf, String)>,
}

/// Select run directories under `results_root` matching `criteria`.
pub fn plan_clean(results_root: &Path, criteria: &CleanCriteria) -> Result<CleanPlan> {
    let mut targets = Vec::new();
    for run in scan_runs(results_root)? {
        if criteria.incomplete && !run.completed {
            targets.push(CleanTarget {
                dir: run.dir,
                reason: CleanReason::Incomplete,
            });
            continue;
        }
        let (Some(filter), Some(snapshot)) = (&criteria.filter, &run.snapshot) else {
            continue;
        };
        let config = match serde_json::to_value(&snapshot.config).context("convert config")? {
            Value::Object(map) => map,
            _ => continue,
        };
        if filter(&config) {
            targets.push(CleanTarget {
                dir: run.dir,
                reason: CleanReason::FilterMatch,
            });
        }
    }
    Ok(CleanPlan { targets })
}

impl CleanPlan {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Delete every target. Failures are collected, not fatal.
    pub fn execute(&self) -> CleanOutcome {
        let mut outcome = CleanOutcome::default();
        for target in &self.targets {
            match fs::remove_dir_all(&target.dir) {
                Ok(()) => {
                    info!(
                        dir = %target.dir.display(),
                        reason = %target.reason,
                        "deleted run directory"
                    );
                    outcome.deleted.push(target.dir.clone());
                }
                Err(err) => {
                    warn!(
                        dir = %target.dir.display(),
                        err = %err,
                        "could not delete run directory"
                    );
                    outcome.errors.push((target.dir.clone(), err.to_string()));
                }
            }
        }
        outcome
    }
}

/// Read one line from `input`; only `yes` (any case) confirms.
pub fn confirm<R: BufRead>(mut input: R) -> Result<bool> {
    let mut line = String::new();
    input.read_line(&mut line).context("read confirmation")?;
    Ok(line.trim().eq_ignore_ascii_case("yes"))
}

/// Parse `key=value` into a filter term. The value is read as JSON when it
/// parses (`8`, `0.1`, `true`), otherwise as a string.
pub fn parse_where(term: &str) -> Result<(String, Value)> {
    let (key, raw) = term
        .split_once('=')
        .with_context(|| format!("expected key=value, got {term:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("empty key in {term:?}");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Filter matching configs where every term's key equals its value.
pub fn where_filter(terms: Vec<(String, Value)>) -> ConfigFilter {
    Box::new(move |config: &Map<String, Value>| {
        terms
            .iter()
            .all(|(key, value)| config.get(key).is_some_and(|found| values_match(found, value)))
    })
}

fn values_match(found: &Value, wanted: &Value) -> bool {
    match (found, wanted) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => found == wanted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep::core::types::Config;
    use sweep::test_support::{write_completed_run, write_incomplete_run};
    use tempfile::tempdir;

    fn populate(root: &Path) {
        write_completed_run(root, "a", &Config::new().with("lr", 0.1).with("batch", 8))
            .expect("a");
        write_completed_run(root, "b", &Config::new().with("lr", 0.2).with("batch", 16))
            .expect("b");
        write_incomplete_run(root, "c", &Config::new().with("lr", 0.1).with("batch", 32))
            .expect("c");
    }

    fn names(plan: &CleanPlan) -> Vec<String> {
        plan.targets
            .iter()
            .filter_map(|t| t.dir.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect()
    }

    #[test]
    fn incomplete_runs_are_selected() {
        let temp = tempdir().expect("tempdir");
        populate(temp.path());
        let plan = plan_clean(
            temp.path(),
            &CleanCriteria {
                incomplete: true,
                filter: None,
            },
        )
        .expect("plan");
        assert_eq!(names(&plan), vec!["c"]);
        assert_eq!(plan.targets[0].reason, CleanReason::Incomplete);
    }

    #[test]
    fn filter_applies_to_completed_runs() {
        let temp = tempdir().expect("tempdir");
        populate(temp.path());
        let plan = plan_clean(
            temp.path(),
            &CleanCriteria {
                incomplete: true,
                filter: Some(where_filter(vec![parse_where("lr=0.1").expect("term")])),
            },
        )
        .expect("plan");
        assert_eq!(names(&plan), vec!["a", "c"]);
        assert_eq!(plan.targets[0].reason, CleanReason::FilterMatch);
    }

    #[test]
    fn planning_deletes_nothing() {
        let temp = tempdir().expect("tempdir");
        populate(temp.path());
        let criteria = CleanCriteria {
            incomplete: true,
            filter: None,
        };
        plan_clean(temp.path(), &criteria).expect("plan");
        assert!(temp.path().join("c").is_dir());
    }

    #[test]
    fn execute_removes_targets() {
        let temp = tempdir().expect("tempdir");
        populate(temp.path());
        let plan = plan_clean(
            temp.path(),
            &CleanCriteria {
                incomplete: true,
                filter: None,
            },
        )
        .expect("plan");
        let outcome = plan.execute();
        assert_eq!(outcome.deleted.len(), 1);
        assert!(outcome.errors.is_empty());
        assert!(!temp.path().join("c").exists());
        assert!(temp.path().join("a").is_dir());
    }

    #[test]
    fn missing_target_is_reported_not_fatal() {
        let temp = tempdir().expect("tempdir");
        let plan = CleanPlan {
            targets: vec![CleanTarget {
                dir: temp.path().join("gone"),
                reason: CleanReason::Incomplete,
            }],
        };
        let outcome = plan.execute();
        assert!(outcome.deleted.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn confirmation_requires_yes() {
        assert!(confirm("yes\n".as_bytes()).expect("read"));
        assert!(confirm("YES\n".as_bytes()).expect("read"));
        assert!(!confirm("y\n".as_bytes()).expect("read"));
        assert!(!confirm("".as_bytes()).expect("read"));
    }

    #[test]
    fn where_terms_parse_json_or_string() {
        assert_eq!(parse_where("batch=8").expect("int").1, serde_json::json!(8));
        assert_eq!(
            parse_where("model=resnet").expect("str").1,
            serde_json::json!("resnet")
        );
        assert!(parse_where("novalue").is_err());
        assert!(parse_where("=1").is_err());
    }

    #[test]
    fn numeric_terms_match_across_int_and_float() {
        let filter = where_filter(vec![parse_where("lr=1").expect("term")]);
        let mut config = Map::new();
        config.insert("lr".to_string(), serde_json::json!(1.0));
        assert!(filter(&config));
    }
}
