//! CLI tests for `analyze report` and `analyze clean`.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use sweep::core::types::Config;
use sweep::test_support::{write_completed_run, write_incomplete_run};

fn populate(root: &Path) {
    write_completed_run(root, "run-a", &Config::new().with("lr", 0.1).with("batch", 16))
        .expect("a");
    fs::write(root.join("run-a/results.json"), r#"{"acc":0.8}"#).expect("results");
    write_completed_run(root, "run-b", &Config::new().with("lr", 0.2).with("batch", 8))
        .expect("b");
    fs::write(root.join("run-b/results.json"), r#"{"acc":0.7}"#).expect("results");
    write_incomplete_run(root, "run-c", &Config::new().with("lr", 0.3).with("batch", 8))
        .expect("c");
}

fn analyze(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_analyze"))
        .args(args)
        .output()
        .expect("spawn analyze")
}

#[test]
fn report_writes_sorted_csv_of_completed_runs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("results");
    populate(&root);
    let csv_path = temp.path().join("summary.csv");

    let output = analyze(&[
        "report",
        root.to_str().expect("utf8 path"),
        "--csv",
        csv_path.to_str().expect("utf8 path"),
        "--sort-by",
        "batch,unknown",
    ]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert!(stdout.contains("completed=2 incomplete=1"));

    let csv = fs::read_to_string(&csv_path).expect("csv");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "batch,lr,acc,run_id,output_dir");
    assert!(lines[1].starts_with("8,0.2,0.7,run-b,"));
    assert!(lines[2].starts_with("16,0.1,0.8,run-a,"));
}

#[test]
fn clean_is_a_dry_run_by_default() {
    let temp = tempfile::tempdir().expect("tempdir");
    populate(temp.path());
    let output = analyze(&["clean", temp.path().to_str().expect("utf8 path")]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert!(stdout.contains("[incomplete]"));
    assert!(stdout.contains("dry run"));
    assert!(temp.path().join("run-c").is_dir());
}

#[test]
fn clean_delete_requires_confirmation() {
    let temp = tempfile::tempdir().expect("tempdir");
    populate(temp.path());
    let root = temp.path().to_str().expect("utf8 path");

    let mut child = Command::new(env!("CARGO_BIN_EXE_analyze"))
        .args(["clean", root, "--delete"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn analyze");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"no\n")
        .expect("write");
    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success());
    assert!(temp.path().join("run-c").is_dir());

    let output = analyze(&["clean", root, "--delete", "--yes", "--where", "batch=8"]);
    assert!(output.status.success());
    assert!(!temp.path().join("run-c").exists());
    assert!(!temp.path().join("run-b").exists());
    assert!(temp.path().join("run-a").is_dir());
}

#[test]
fn malformed_where_term_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    populate(temp.path());
    let root = temp.path().to_str().expect("utf8 path");
    let output = analyze(&["clean", root, "--where", "batch"]);
    assert_eq!(output.status.code(), Some(sweep::exit_codes::INVALID));
    let stderr = String::from_utf8(output.stderr).expect("utf8");
    assert!(stderr.contains("key=value"));
    assert!(temp.path().join("run-c").is_dir());
}
