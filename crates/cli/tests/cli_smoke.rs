//! End-to-end smoke tests for the capstan binary, run against a
//! temporary state directory.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn capstan() -> Command {
  Command::cargo_bin("capstan").unwrap()
}

fn write_chart(dir: &Path, data_version: &str) {
  fs::write(dir.join("chart.yaml"), "name: web\nversion: 1.0.0\n").unwrap();
  let templates = dir.join("templates");
  if !templates.exists() {
    fs::create_dir(&templates).unwrap();
  }
  fs::write(
    templates.join("configmap.yaml"),
    format!(
      "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web-config\n  namespace: default\ndata:\n  version: \"{data_version}\"\n"
    ),
  )
  .unwrap();
}

#[test]
fn help_lists_subcommands() {
  capstan()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("deploy"))
    .stdout(predicate::str::contains("rollback"))
    .stdout(predicate::str::contains("uninstall"));
}

#[test]
fn version_prints_binary_name() {
  capstan()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("capstan"));
}

#[test]
fn deploy_then_status_and_history() {
  let work = tempfile::tempdir().unwrap();
  let chart = work.path().join("chart");
  fs::create_dir(&chart).unwrap();
  write_chart(&chart, "1");
  let state = work.path().join("state");

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "deploy", "web", chart.to_str().unwrap()])
    .assert()
    .success()
    .stdout(predicate::str::contains("revision 1 deployed"));

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "status", "web"])
    .assert()
    .success()
    .stdout(predicate::str::contains("deployed"));

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "history", "web"])
    .assert()
    .success()
    .stdout(predicate::str::contains("REVISION"))
    .stdout(predicate::str::contains("deployed"));

  // The simulated cluster was persisted.
  let cluster = fs::read_to_string(state.join("cluster.yaml")).unwrap();
  assert!(cluster.contains("web-config"));
}

#[test]
fn upgrade_then_rollback_restores_previous_data() {
  let work = tempfile::tempdir().unwrap();
  let chart = work.path().join("chart");
  fs::create_dir(&chart).unwrap();
  let state = work.path().join("state");

  write_chart(&chart, "1");
  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "deploy", "web", chart.to_str().unwrap()])
    .assert()
    .success();

  write_chart(&chart, "2");
  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "deploy", "web", chart.to_str().unwrap()])
    .assert()
    .success()
    .stdout(predicate::str::contains("revision 2 deployed"));

  let cluster = fs::read_to_string(state.join("cluster.yaml")).unwrap();
  assert!(cluster.contains("version: '2'") || cluster.contains("version: \"2\""));

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "rollback", "web", "1"])
    .assert()
    .success()
    .stdout(predicate::str::contains("rolled back to revision 1 as revision 3"));

  let cluster = fs::read_to_string(state.join("cluster.yaml")).unwrap();
  assert!(cluster.contains("version: '1'") || cluster.contains("version: \"1\""));
}

#[test]
fn uninstall_removes_resources_and_retires_release() {
  let work = tempfile::tempdir().unwrap();
  let chart = work.path().join("chart");
  fs::create_dir(&chart).unwrap();
  write_chart(&chart, "1");
  let state = work.path().join("state");

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "deploy", "web", chart.to_str().unwrap()])
    .assert()
    .success();

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "uninstall", "web"])
    .assert()
    .success()
    .stdout(predicate::str::contains("uninstalled"));

  let cluster = fs::read_to_string(state.join("cluster.yaml")).unwrap();
  assert!(!cluster.contains("web-config"));

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "status", "web"])
    .assert()
    .success()
    .stdout(predicate::str::contains("uninstalled"));
}

#[test]
fn plan_previews_without_changing_state() {
  let work = tempfile::tempdir().unwrap();
  let chart = work.path().join("chart");
  fs::create_dir(&chart).unwrap();
  write_chart(&chart, "1");
  let state = work.path().join("state");

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "plan", "web", chart.to_str().unwrap()])
    .assert()
    .success()
    .stdout(predicate::str::contains("initial install"))
    .stdout(predicate::str::contains("create"));

  assert!(!state.join("cluster.yaml").exists());

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "history", "web"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No revisions recorded"));
}

#[test]
fn deploy_with_set_overrides_values() {
  let work = tempfile::tempdir().unwrap();
  let chart = work.path().join("chart");
  fs::create_dir(&chart).unwrap();
  write_chart(&chart, "1");
  fs::write(chart.join("values.yaml"), "tier: web\n").unwrap();
  let state = work.path().join("state");

  capstan()
    .args([
      "--state-dir",
      state.to_str().unwrap(),
      "deploy",
      "web",
      chart.to_str().unwrap(),
      "--set",
      "tier=backend",
    ])
    .assert()
    .success();

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "status", "web", "--format", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"revision\": 1"));
}

#[test]
fn missing_chart_directory_is_an_error() {
  let work = tempfile::tempdir().unwrap();
  let state = work.path().join("state");

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "deploy", "web", "no-such-chart"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Chart directory not found"));
}

#[test]
fn rollback_to_unknown_revision_fails() {
  let work = tempfile::tempdir().unwrap();
  let chart = work.path().join("chart");
  fs::create_dir(&chart).unwrap();
  write_chart(&chart, "1");
  let state = work.path().join("state");

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "deploy", "web", chart.to_str().unwrap()])
    .assert()
    .success();

  capstan()
    .args(["--state-dir", state.to_str().unwrap(), "rollback", "web", "9"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("not found"));
}
