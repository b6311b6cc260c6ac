//! Aggregate successful runs into rows and write them as CSV.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use sweep::io::oracle::scan_runs;

pub const DEFAULT_RESULTS_FILE: &str = "results.json";

/// One successful run: its configuration and the metrics it reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub run_id: String,
    pub output_dir: PathBuf,
    pub config: Map<String, Value>,
    /// Fields of the results file, empty if it was missing.
    pub results: Map<String, Value>,
}

impl Record {
    /// Result fields shadow config fields of the same name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.results.get(column).or_else(|| self.config.get(column))
    }
}

/// Collect every completed run under `results_root`, sorted by run id.
///
/// Returns warnings for results files that exist but cannot be used.
pub fn collect(results_root: &Path, results_file: &str) -> Result<(Vec<Record>, Vec<String>)> {
    let mut records = Vec::new();
    let mut warnings = Vec::new();

    for run in scan_runs(results_root)? {
        if !run.completed {
            continue;
        }
        let Some(snapshot) = run.snapshot else {
            if let Some(reason) = run.snapshot_error {
                warnings.push(format!("skip {}: {reason}", run.dir.display()));
            }
            continue;
        };
        let config = match serde_json::to_value(&snapshot.config).context("convert config")? {
            Value::Object(map) => map,
            other => bail!("config snapshot is not an object: {other}"),
        };
        let results_path = run.dir.join(results_file);
        let results = match load_results(&results_path) {
            Ok(results) => results,
            Err(err) => {
                warnings.push(format!("skip results of {}: {err:#}", run.dir.display()));
                Map::new()
            }
        };
        records.push(Record {
            run_id: snapshot.run_id,
            output_dir: run.dir,
            config,
            results,
        });
    }

    records.sort_by(|a, b| a.run_id.cmp(&b.run_id));
    debug!(records = records.len(), "records collected");
    Ok((records, warnings))
}

fn load_results(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    match serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))? {
        Value::Object(map) => Ok(map),
        _ => bail!("{} is not a JSON object", path.display()),
    }
}

/// Column order: config fields (sorted), result-only fields (sorted), then
/// `run_id` and `output_dir`.
pub fn columns(records: &[Record]) -> Vec<String> {
    let config: BTreeSet<&String> = records.iter().flat_map(|r| r.config.keys()).collect();
    let results: BTreeSet<&String> = records
        .iter()
        .flat_map(|r| r.results.keys())
        .filter(|key| !config.contains(key))
        .collect();
    config
        .into_iter()
        .chain(results)
        .cloned()
        .chain(["run_id".to_string(), "output_dir".to_string()])
        .collect()
}

/// Sort rows by the `sort_by` columns that exist; unknown columns are ignored.
pub fn sort_records(records: &mut [Record], sort_by: &[String]) {
    let known: BTreeSet<String> = columns(records).into_iter().collect();
    let keys: Vec<&String> = sort_by.iter().filter(|key| known.contains(*key)).collect();
    if keys.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        keys.iter()
            .map(|key| compare_values(a.get(key), b.get(key)))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Numbers compare numerically, everything else by display text. Missing
/// values sort last.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Some(x), Some(y)) => cell(x).cmp(&cell(y)),
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Write `records` as CSV to `writer`. Returns the number of rows written.
pub fn write_csv<W: Write>(records: &[Record], writer: W) -> Result<usize> {
    let columns = columns(records);
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&columns).context("write csv header")?;
    for record in records {
        let row = columns.iter().map(|column| match column.as_str() {
            "run_id" if !record.results.contains_key("run_id") => record.run_id.clone(),
            "output_dir" if !record.results.contains_key("output_dir") => {
                record.output_dir.display().to_string()
            }
            _ => record.get(column).map(cell).unwrap_or_default(),
        });
        wtr.write_record(row).context("write csv row")?;
    }
    wtr.flush().context("flush csv")?;
    Ok(records.len())
}

/// Sort by `sort_by` and write the table to `path`.
pub fn to_csv(records: &mut [Record], path: &Path, sort_by: &[String]) -> Result<usize> {
    sort_records(records, sort_by);
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    write_csv(records, file).with_context(|| format!("write {}", path.display()))
}
