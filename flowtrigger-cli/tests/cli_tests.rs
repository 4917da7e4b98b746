//! Integration tests for the flowtrigger binary

use anyhow::Result;
use assert_cmd::Command;
use chrono::{Duration, Utc};
use flowtrigger::test_utils::execution_record;
use flowtrigger::ExecutionLog;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

const TRIGGER: &str = r#"
id: large-invoice
name: Large invoice
event_type: TASK_COMPLETED
conditions:
  operator: AND
  children:
    - field: amount
      operator: greater_than
      value: 1000
    - field: status
      operator: equals
      value: COMPLETED
actions:
  - type: email
    config:
      to: finance@example.com
"#;

const FLOW: &str = r#"
id: approval
name: Approval
levels:
  - id: a
    order: 1
  - id: b
    order: 2
  - id: c
    order: 3
branches:
  - id: fast-track
    from_level_id: a
    to_level_id: c
    priority: 1
    conditions:
      operator: AND
      children:
        - field: amount
          operator: greater_than
          value: 1000
"#;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn flowtrigger() -> Command {
    Command::cargo_bin("flowtrigger").unwrap()
}

#[test]
fn test_help_without_command() {
    flowtrigger()
        .assert()
        .success()
        .stdout(predicate::str::contains("test-trigger"));
}

#[test]
fn test_trigger_conditions_met() -> Result<()> {
    let dir = TempDir::new()?;
    let trigger = write(&dir, "trigger.yaml", TRIGGER);
    let data = write(&dir, "sample.json", r#"{"amount": 5000, "status": "COMPLETED"}"#);

    flowtrigger()
        .arg("test-trigger")
        .arg(&trigger)
        .arg("--data")
        .arg(&data)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("conditions met"))
        .stdout(predicate::str::contains("amount"));
    Ok(())
}

#[test]
fn test_trigger_conditions_not_met_exits_with_warning() -> Result<()> {
    let dir = TempDir::new()?;
    let trigger = write(&dir, "trigger.yaml", TRIGGER);
    let data = write(&dir, "sample.json", r#"{"amount": 10, "status": "COMPLETED"}"#);

    let output = flowtrigger()
        .args(["test-trigger", "--format", "json", "--data"])
        .arg(&data)
        .arg(&trigger)
        .output()?;

    assert_eq!(output.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["trigger_id"], "large-invoice");
    assert_eq!(report["conditions_met"], false);
    Ok(())
}

#[test]
fn test_trigger_with_missing_sample_is_an_error() -> Result<()> {
    let dir = TempDir::new()?;
    let trigger = write(&dir, "trigger.yaml", TRIGGER);

    flowtrigger()
        .arg("test-trigger")
        .arg(&trigger)
        .arg("--data")
        .arg(dir.path().join("missing.json"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Error: reading sample data"))
        .stderr(predicate::str::contains("Caused by:"));
    Ok(())
}

#[test]
fn test_validate_reports_invalid_files() -> Result<()> {
    let dir = TempDir::new()?;
    let good_trigger = write(&dir, "trigger.yaml", TRIGGER);
    let good_flow = write(&dir, "flow.yaml", FLOW);
    let bad = write(&dir, "bad.yaml", "id: empty\nevent_type: SCHEDULED\n");

    flowtrigger()
        .arg("validate")
        .arg(&good_trigger)
        .arg(&good_flow)
        .assert()
        .success()
        .stdout(predicate::str::contains("Validation passed"));

    flowtrigger()
        .arg("validate")
        .arg(&good_trigger)
        .arg(&bad)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("1 of 2 files invalid"));
    Ok(())
}

#[test]
fn test_flow_run_follows_matching_branch() -> Result<()> {
    let dir = TempDir::new()?;
    let flow = write(&dir, "flow.yaml", FLOW);

    flowtrigger()
        .args(["flow", "run"])
        .arg(&flow)
        .args(["--level-data", r#"{"amount": 5000}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("a -> c via branch fast-track"))
        .stdout(predicate::str::contains("c -> complete via end of flow"));

    let output = flowtrigger()
        .args(["flow", "run", "--format", "json"])
        .arg(&flow)
        .args(["--level-data", r#"{"amount": 10}"#])
        .output()?;
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let transitions = report["transitions"].as_array().unwrap();
    assert_eq!(transitions.len(), 3);
    assert_eq!(transitions[0]["resolution"]["via"], "sequential");
    Ok(())
}

#[test]
fn test_flow_run_rejects_invalid_level_data() -> Result<()> {
    let dir = TempDir::new()?;
    let flow = write(&dir, "flow.yaml", FLOW);

    flowtrigger()
        .args(["flow", "run"])
        .arg(&flow)
        .args(["--level-data", "[1, 2]"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--level-data"));
    Ok(())
}

#[test]
fn test_history_lists_and_cleans_up() -> Result<()> {
    let dir = TempDir::new()?;
    let log = ExecutionLog::file_system(dir.path())?;
    log.append(&execution_record("recent", Utc::now()))?;
    log.append(&execution_record("stale", Utc::now() - Duration::days(60)))?;

    let output = flowtrigger()
        .args(["history", "--format", "json"])
        .arg(dir.path())
        .output()?;
    assert!(output.status.success());
    let records: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout)?;
    assert_eq!(records.len(), 2);

    let output = flowtrigger()
        .args(["history", "--format", "json", "--cleanup-days", "30"])
        .arg(dir.path())
        .output()?;
    let records: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout)?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["trigger_id"], "recent");

    flowtrigger()
        .args(["history", "--trigger", "recent"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("recent"))
        .stdout(predicate::str::contains("1 executions, 0 failed"));
    Ok(())
}
