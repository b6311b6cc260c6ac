//! CLI command implementations.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use sweep::exit_codes;
use sweep::io::oracle::run_counts;

use crate::clean::{CleanCriteria, confirm, parse_where, plan_clean, where_filter};
use crate::report::{collect, sort_records, to_csv};

pub struct CleanArgs {
    pub keep_incomplete: bool,
    pub where_terms: Vec<String>,
    pub delete: bool,
    pub yes: bool,
}

/// Print run counts and completed rows; optionally write them to CSV.
pub fn report(
    results_root: &Path,
    results_file: &str,
    csv: Option<&Path>,
    sort_by: &[String],
) -> Result<i32> {
    let counts = run_counts(results_root)?;
    println!(
        "report: runs={} completed={} incomplete={} unreadable={}",
        counts.runs, counts.completed, counts.incomplete, counts.unreadable
    );

    let (mut records, warnings) = collect(results_root, results_file)?;
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    if records.is_empty() {
        println!("report: no completed runs");
        return Ok(exit_codes::OK);
    }

    match csv {
        Some(path) => {
            let rows = to_csv(&mut records, path, sort_by).context("write csv")?;
            println!("report: wrote {} rows to {}", rows, path.display());
        }
        None => {
            sort_records(&mut records, sort_by);
            for record in &records {
                let results = serde_json::to_string(&record.results).context("serialize results")?;
                println!("run: run_id={} results={}", record.run_id, results);
            }
        }
    }
    Ok(exit_codes::OK)
}

/// Plan a cleanup, print it, and delete only when confirmed.
///
/// Exits with `FAILURES` when some selected directory could not be deleted.
pub fn clean(results_root: &Path, args: &CleanArgs) -> Result<i32> {
    let terms = args
        .where_terms
        .iter()
        .map(|term| parse_where(term))
        .collect::<Result<Vec<_>>>()?;
    let criteria = CleanCriteria {
        incomplete: !args.keep_incomplete,
        filter: (!terms.is_empty()).then(|| where_filter(terms)),
    };
    debug!(?criteria, "planning cleanup");

    let plan = plan_clean(results_root, &criteria)?;
    if plan.is_empty() {
        println!("clean: nothing matched");
        return Ok(exit_codes::OK);
    }
    for target in &plan.targets {
        println!("clean: [{}] {}", target.reason, target.dir.display());
    }

    if !args.delete {
        println!(
            "clean: dry run, {} directories would be deleted (pass --delete to remove)",
            plan.len()
        );
        return Ok(exit_codes::OK);
    }
    if !args.yes {
        println!(
            "clean: permanently delete these {} directories? (yes/no)",
            plan.len()
        );
        if !confirm(io::stdin().lock())? {
            println!("clean: cancelled");
            return Ok(exit_codes::OK);
        }
    }

    let outcome = plan.execute();
    for (dir, err) in &outcome.errors {
        eprintln!("warning: could not delete {}: {}", dir.display(), err);
    }
    println!(
        "clean: deleted={} errors={}",
        outcome.deleted.len(),
        outcome.errors.len()
    );
    if outcome.errors.is_empty() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::FAILURES)
    }
}
