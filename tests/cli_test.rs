//! CLI tests for the doitoml binary.

mod common;

use common::Project;
use predicates::prelude::*;
use serde_json::Value;

fn project() -> Project {
    Project::with_pyproject(
        r#"prefix = "demo"
env = { GREETING = "hello" }

[tool.doitoml.tasks.build]
doc = "build everything"
actions = ["echo \"$GREETING\" > built.txt"]

[tool.doitoml.tasks.fail]
actions = ["exit 1"]
"#,
    )
}

#[test]
fn test_list_shows_names_and_docs() {
    let project = project();
    project
        .doitoml()
        .env("NO_COLOR", "1")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("demo:build  build everything"))
        .stdout(predicate::str::contains("demo:fail"));
}

#[test]
fn test_dump_prints_the_resolved_configuration() {
    let project = project();
    let output = project.doitoml().arg("dump").output().unwrap();
    assert!(output.status.success());

    let dumped: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(dumped["env"]["GREETING"], "hello");
    assert_eq!(
        dumped["tasks"]["demo:build"]["meta"]["doitoml"]["cwd"],
        Value::String(project.posix(""))
    );
}

#[cfg(unix)]
#[test]
fn test_run_executes_actions_with_the_config_env() {
    let project = project();
    project
        .doitoml()
        .args(["run", "demo:build"])
        .assert()
        .success();
    assert_eq!(project.read("built.txt"), "hello\n");
}

#[cfg(unix)]
#[test]
fn test_run_reports_failed_tasks() {
    let project = project();
    project
        .doitoml()
        .env("NO_COLOR", "1")
        .args(["run", "demo:fail"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Task 'demo:fail' failed."));
}

#[test]
fn test_run_rejects_unknown_tasks() {
    let project = project();
    project
        .doitoml()
        .env("NO_COLOR", "1")
        .args(["run", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Task 'nope' not found."));
}

#[test]
fn test_missing_config_fails_loudly_when_asked() {
    let project = Project::new();
    project
        .doitoml()
        .args(["--fail-loudly", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No config found"));
}

#[test]
fn test_missing_config_is_logged_when_failing_quietly() {
    let project = Project::new();
    project
        .doitoml()
        .args(["--fail-quietly", "list"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("No config found"));
}

#[test]
fn test_explicit_config_paths_are_relative_to_cwd() {
    let project = Project::new();
    project.write(
        "sub/pyproject.toml",
        "[tool.doitoml.tasks.hi]\nactions = [\"echo hi\"]\n",
    );
    project
        .doitoml()
        .env("NO_COLOR", "1")
        .args(["--cwd", "sub", "--config", "pyproject.toml", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hi"));
}
