//! CLI tests for `sweep plan`, `sweep run`, and `sweep status`.
//!
//! Spawns the sweep binary against a plan file in a temp directory and checks
//! exit codes and the run directories left behind.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use sweep::exit_codes;
use sweep::io::layout::{SUCCESS_MARKER, list_run_dirs};

fn write_plan(dir: &Path, script: &str) {
    let plan = format!(
        r#"
results_root = "results"
command = ["sh", "-c", {script:?}]

[base]
lr = 0.1

[[expand]]
kind = "grid"
[expand.params]
batch = [8, 16, 32]
"#
    );
    fs::write(dir.join("sweep.toml"), plan).expect("write plan");
}

fn sweep(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sweep"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn sweep")
}

fn completed_runs(root: &Path) -> usize {
    list_run_dirs(root)
        .expect("list")
        .iter()
        .filter(|dir| dir.join(SUCCESS_MARKER).is_file())
        .count()
}

#[test]
fn plan_prints_one_config_per_line() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plan(temp.path(), "true");
    let output = sweep(temp.path(), &["plan", "sweep.toml"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            r#"{"batch":8,"lr":0.1}"#,
            r#"{"batch":16,"lr":0.1}"#,
            r#"{"batch":32,"lr":0.1}"#,
        ]
    );
}

#[test]
fn run_reports_failures_and_resumes() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plan(
        temp.path(),
        "if [ \"$SWEEP_PARAM_BATCH\" = 16 ] && [ ! -f ../allow16 ]; then exit 1; fi; echo '{}' > results.json",
    );
    let results = temp.path().join("results");

    let first = sweep(temp.path(), &["run", "sweep.toml"]);
    assert_eq!(first.status.code(), Some(exit_codes::FAILURES));
    assert_eq!(completed_runs(&results), 2);

    fs::write(results.join("allow16"), "").expect("allow");
    let second = sweep(temp.path(), &["run", "sweep.toml", "--mode", "parallel"]);
    assert_eq!(second.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8(second.stdout).expect("utf8");
    assert!(stdout.contains("dispatching=1"));
    assert_eq!(completed_runs(&results), 3);

    let status = sweep(temp.path(), &["status", "results"]);
    let stdout = String::from_utf8(status.stdout).expect("utf8");
    assert!(stdout.contains("completed=3 incomplete=1"));
}

#[test]
fn invalid_plan_exits_with_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("sweep.toml"), "command = []\n").expect("write");
    let output = sweep(temp.path(), &["run", "sweep.toml"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8(output.stderr).expect("utf8");
    assert!(stderr.contains("command"));
}
