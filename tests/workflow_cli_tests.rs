//! Workflow engine behavior through the CLI: results on stdout, exit codes,
//! dry-run previews.

mod common;

use common::asc_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_workflow(dir: &TempDir, content: &str) -> String {
    let path = dir.path().join("asc.yml");
    std::fs::write(&path, content).unwrap();
    path.to_str().unwrap().to_string()
}

fn stdout_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap()
}

#[test]
fn sub_workflow_step_records_parent() {
    let dir = TempDir::new().unwrap();
    let file = write_workflow(
        &dir,
        "workflows:\n  main:\n    steps:\n      - workflow: helper\n  helper:\n    private: true\n    steps:\n      - run: \"echo hi\"\n",
    );

    let assert = asc_cmd(dir.path())
        .args(["run", "main", "--file", &file])
        .assert()
        .success();

    let result = stdout_json(&assert.get_output().stdout);
    assert_eq!(result["status"], "ok");
    assert_eq!(result["steps"].as_array().unwrap().len(), 1);
    assert_eq!(result["steps"][0]["parentWorkflow"], "helper");
}

#[test]
fn pipefail_failure_yields_error_status_and_exit_1() {
    let dir = TempDir::new().unwrap();
    let file = write_workflow(
        &dir,
        "workflows:\n  main:\n    steps:\n      - run: \"false | cat\"\n",
    );

    let assert = asc_cmd(dir.path())
        .args(["run", "main", "--file", &file])
        .assert()
        .code(1);

    let result = stdout_json(&assert.get_output().stdout);
    assert_eq!(result["status"], "error");
}

#[test]
fn private_workflow_cannot_run_at_top_level() {
    let dir = TempDir::new().unwrap();
    let file = write_workflow(
        &dir,
        "workflows:\n  hidden:\n    private: true\n    steps:\n      - run: \"true\"\n",
    );

    asc_cmd(dir.path())
        .args(["run", "hidden", "--file", &file])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("private"));
}

#[test]
fn dry_run_previews_unexpanded_commands_on_stderr() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("ran");
    let file = write_workflow(
        &dir,
        &format!(
            "workflows:\n  main:\n    steps:\n      - run: \"touch {} $SECRET_TOKEN\"\n",
            marker.display()
        ),
    );

    let assert = asc_cmd(dir.path())
        .args(["run", "main", "--file", &file, "--dry-run"])
        .assert()
        .success()
        .stderr(predicate::str::contains("would run: touch"))
        .stderr(predicate::str::contains("$SECRET_TOKEN"));

    let result = stdout_json(&assert.get_output().stdout);
    assert_eq!(result["steps"][0]["status"], "dry-run");
    assert!(!marker.exists(), "dry-run must not execute commands");
}

#[test]
fn params_override_definition_env() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("observed");
    let file = write_workflow(
        &dir,
        &format!(
            "env:\n  X: d\nworkflows:\n  main:\n    env:\n      X: w\n    steps:\n      - run: \"printf '%s' \\\"$X\\\" > {}\"\n",
            out.display()
        ),
    );

    asc_cmd(dir.path())
        .args(["run", "main", "--file", &file, "--param", "X=r"])
        .assert()
        .success();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "r");
}

#[test]
fn validate_reports_cycle_and_unknown_reference() {
    let dir = TempDir::new().unwrap();
    let file = write_workflow(
        &dir,
        "workflows:\n  a:\n    steps:\n      - workflow: b\n      - workflow: ghost\n  b:\n    steps:\n      - workflow: a\n",
    );

    let assert = asc_cmd(dir.path())
        .args(["validate", "--file", &file])
        .assert()
        .code(1);

    let issues = stdout_json(&assert.get_output().stdout);
    let messages: Vec<String> = issues
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["message"].as_str().unwrap().to_string())
        .collect();
    assert!(messages.iter().any(|m| m.contains("cycle")));
    assert!(messages.iter().any(|m| m.contains("ghost")));
}

#[test]
fn validate_clean_definition_succeeds() {
    let dir = TempDir::new().unwrap();
    let file = write_workflow(
        &dir,
        "workflows:\n  main:\n    steps:\n      - run: \"true\"\n",
    );

    asc_cmd(dir.path())
        .args(["validate", "--file", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn missing_definition_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    asc_cmd(dir.path())
        .args(["run", "main", "--file", "/nonexistent/asc.yml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}
