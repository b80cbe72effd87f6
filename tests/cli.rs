//! Binary-level tests: argument handling, report lines and exit codes.

mod common;

use common::Fixture;
use std::path::Path;
use std::process::{Command, Output};

fn gapval(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gapval"))
        .args(args)
        .env("GAPVAL_LOG", "warn")
        .output()
        .expect("run gapval")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn path(path: &Path) -> &str {
    path.to_str().expect("utf8 path")
}

fn init_args(fixture: &Fixture) -> Vec<String> {
    let request = &fixture.request;
    let mut args = vec![
        "init".to_string(),
        "--run-dir".to_string(),
        path(&fixture.run_dir).to_string(),
        "--draft".to_string(),
        path(&request.draft).to_string(),
        "--proteins".to_string(),
        path(&request.proteins).to_string(),
        "--target".to_string(),
        "T".to_string(),
        "--seed".to_string(),
        "S".to_string(),
        "--solver-command".to_string(),
        "gapval-test-missing-solver {draft}".to_string(),
        "--blastp-command".to_string(),
        "gapval-test-missing-blastp".to_string(),
    ];
    for reference in &request.references {
        args.push("--reference".to_string());
        args.push(path(reference).to_string());
    }
    for organism in &request.organisms {
        args.push("--proteome".to_string());
        args.push(format!("{}={}", organism.id, path(&organism.sequences)));
    }
    args
}

fn run_init(fixture: &Fixture) -> Output {
    let args = init_args(fixture);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    gapval(&args)
}

#[test]
fn init_then_status_reports_next_stage() {
    let fixture = Fixture::new();
    let init = run_init(&fixture);
    assert!(init.status.success(), "{}", String::from_utf8_lossy(&init.stderr));
    assert_eq!(stdout(&init).trim(), "stage=init verdict=success");

    let status = gapval(&["status", "--run-dir", path(&fixture.run_dir), "--json"]);
    assert!(status.status.success());
    let report: serde_json::Value = serde_json::from_slice(&status.stdout).expect("status json");
    assert_eq!(report["state"], "INIT_DONE");
    assert_eq!(report["run_id"], "run");
    let next = report["next_action"].as_str().expect("next action");
    assert!(next.starts_with("gapval check --run-dir"), "{next}");
}

#[test]
fn second_init_without_force_fails_with_precondition_code() {
    let fixture = Fixture::new();
    assert!(run_init(&fixture).status.success());
    let again = run_init(&fixture);
    assert_eq!(again.status.code(), Some(2));
    assert!(stdout(&again).starts_with("stage=init verdict=failure kind=PreconditionError"));
}

#[test]
fn check_fails_when_tools_are_missing() {
    let fixture = Fixture::new();
    assert!(run_init(&fixture).status.success());
    let check = gapval(&["check", "--run-dir", path(&fixture.run_dir)]);
    assert_eq!(check.status.code(), Some(2));
    let line = stdout(&check);
    assert!(
        line.starts_with("stage=check verdict=failure kind=PreconditionError cause=unmet preconditions: tool:solver"),
        "{line}"
    );
    assert!(line.contains("gapval-test-missing-solver"), "{line}");
    assert!(!fixture.run_dir.join("stages").join("check").exists());
}

#[test]
fn stage_before_init_fails() {
    let fixture = Fixture::new();
    let blastp = gapval(&["blastp", "--run-dir", path(&fixture.run_dir)]);
    assert_eq!(blastp.status.code(), Some(2));
    assert!(stdout(&blastp).starts_with("stage=blastp verdict=failure kind=PreconditionError"));
}

#[test]
fn init_requires_a_draft() {
    let fixture = Fixture::new();
    let output = gapval(&["init", "--run-dir", path(&fixture.run_dir), "--target", "T"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout(&output).contains("cause=invalid config: --draft is required"));
}
