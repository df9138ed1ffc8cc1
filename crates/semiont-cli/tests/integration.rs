#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const MOCK_ENV: &str = r#"
default_platform: mock
services:
  backend:
    type: backend
    port: 4000
  frontend:
    type: frontend
    port: 3000
"#;

fn semiont(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("semiont").unwrap();
    cmd.current_dir(dir.path())
        .env("SEMIONT_ROOT", dir.path())
        .env_remove("SEMIONT_ENV")
        .env_remove("RUST_LOG");
    cmd
}

fn mock_project(env_yaml: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    semiont(&dir).arg("init").assert().success();
    std::fs::write(dir.path().join("environments/local.yaml"), env_yaml).unwrap();
    dir
}

fn state_file(dir: &TempDir, service: &str) -> std::path::PathBuf {
    dir.path()
        .join(format!(".semiont/state/local/{service}.json"))
}

// ---------------------------------------------------------------------------
// semiont init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_project_and_environment() {
    let dir = TempDir::new().unwrap();
    semiont(&dir)
        .args(["init", "--name", "demo", "--platform", "container"])
        .assert()
        .success()
        .stdout(predicate::str::contains("created: semiont.yaml"));

    let project = std::fs::read_to_string(dir.path().join("semiont.yaml")).unwrap();
    assert!(project.contains("name: demo"));
    assert!(project.contains("default_environment: local"));

    let env = std::fs::read_to_string(dir.path().join("environments/local.yaml")).unwrap();
    assert!(env.contains("default_platform: container"));

    let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert!(gitignore.lines().any(|l| l == ".semiont/"));
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    semiont(&dir).arg("init").assert().success();
    semiont(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  semiont.yaml"));

    let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert_eq!(gitignore.matches(".semiont/").count(), 1);
}

#[test]
fn init_rejects_bad_environment_name() {
    let dir = TempDir::new().unwrap();
    semiont(&dir)
        .args(["init", "--environment", "Prod Env"])
        .assert()
        .failure();
    assert!(!dir.path().join("semiont.yaml").exists());
}

#[test]
fn lifecycle_needs_init() {
    let dir = TempDir::new().unwrap();
    semiont(&dir)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("semiont init"));
}

// ---------------------------------------------------------------------------
// lifecycle on the mock platform
// ---------------------------------------------------------------------------

#[test]
fn start_check_stop_round_trip() {
    let dir = mock_project(MOCK_ENV);

    semiont(&dir)
        .args(["start", "-s", "backend"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backend"))
        .stdout(predicate::str::contains("http://localhost:4000"));
    assert!(state_file(&dir, "backend").exists());
    assert!(!state_file(&dir, "frontend").exists());

    semiont(&dir)
        .args(["check", "-s", "backend"])
        .assert()
        .success()
        .stdout(predicate::str::contains("running"));

    semiont(&dir)
        .args(["stop", "-s", "backend"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stopped"));
    assert!(!state_file(&dir, "backend").exists());
}

#[test]
fn start_all_records_every_service() {
    let dir = mock_project(MOCK_ENV);
    semiont(&dir).arg("start").assert().success();
    assert!(state_file(&dir, "backend").exists());
    assert!(state_file(&dir, "frontend").exists());

    semiont(&dir)
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backend"))
        .stdout(predicate::str::contains("frontend"))
        .stdout(predicate::str::contains("mock"));
}

#[test]
fn json_output_is_a_result_array() {
    let dir = mock_project(MOCK_ENV);
    let output = semiont(&dir)
        .args(["check", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["service"], "backend");
    assert_eq!(results[0]["platform"], "mock");
    assert_eq!(results[0]["command"], "check");
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[0]["details"]["status"], "stopped");
}

#[test]
fn stop_runs_in_reverse_order() {
    let dir = mock_project(MOCK_ENV);
    let output = semiont(&dir)
        .args(["stop", "-s", "backend", "-s", "frontend", "--json"])
        .output()
        .unwrap();
    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let order: Vec<&str> = results
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["service"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec!["frontend", "backend"]);
}

#[test]
fn simulated_failure_sets_exit_code() {
    let dir = mock_project(&format!(
        "{MOCK_ENV}  flaky:\n    type: generic\n    simulate_failure: [start]\n"
    ));

    semiont(&dir)
        .arg("start")
        .assert()
        .failure()
        .stdout(predicate::str::contains("simulated failure: start"))
        .stderr(predicate::str::contains("error: 1 of 3 operations failed"));

    // The other services still started.
    assert!(state_file(&dir, "backend").exists());
    assert!(!state_file(&dir, "flaky").exists());
}

#[test]
fn unknown_service_fails() {
    let dir = mock_project(MOCK_ENV);
    semiont(&dir)
        .args(["start", "-s", "worker"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("'worker' is not defined"));
}

#[test]
fn dry_run_changes_nothing() {
    let dir = mock_project(MOCK_ENV);
    semiont(&dir)
        .args(["start", "-s", "backend", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dry run"));
    assert!(!state_file(&dir, "backend").exists());
}

#[test]
fn platform_override_without_handler_fails() {
    let dir = mock_project(MOCK_ENV);
    semiont(&dir)
        .args(["start", "-s", "backend", "--platform", "external"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("no handler for external/backend/start"));
}

#[test]
fn exec_prints_command_output() {
    let dir = mock_project(MOCK_ENV);
    semiont(&dir)
        .args(["exec", "-s", "backend", "--", "echo", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("echo hello"));
}

#[test]
fn exec_requires_one_service() {
    let dir = mock_project(MOCK_ENV);
    semiont(&dir)
        .args(["exec", "--", "ls"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exactly one --service"));
}

#[test]
fn backup_then_restore_by_id() {
    let dir = mock_project(MOCK_ENV);
    semiont(&dir)
        .args(["backup", "-s", "backend", "--name", "nightly"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backup nightly"));

    semiont(&dir)
        .args(["restore", "-s", "backend", "--backup", "nightly"])
        .assert()
        .success()
        .stdout(predicate::str::contains("restored nightly"));

    semiont(&dir)
        .args(["restore", "-s", "backend", "--backup", "missing"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("backup 'missing' not found"));
}

// ---------------------------------------------------------------------------
// secrets and state
// ---------------------------------------------------------------------------

#[test]
fn secret_set_get_list_delete() {
    let dir = mock_project(MOCK_ENV);
    semiont(&dir)
        .args(["secret", "set", "-s", "backend", "API_KEY", "abc123"])
        .assert()
        .success();

    semiont(&dir)
        .args(["secret", "get", "-s", "backend", "API_KEY"])
        .assert()
        .success()
        .stdout(predicate::str::diff("abc123\n"));

    semiont(&dir)
        .args(["secret", "list", "-s", "backend"])
        .assert()
        .success()
        .stdout(predicate::str::contains("API_KEY"));

    semiont(&dir)
        .args(["secret", "delete", "-s", "backend", "API_KEY"])
        .assert()
        .success();

    semiont(&dir)
        .args(["secret", "get", "-s", "backend", "API_KEY"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("secret 'API_KEY' not found"));
}

#[test]
fn state_clear_forgets_a_service() {
    let dir = mock_project(MOCK_ENV);
    semiont(&dir).args(["start", "-s", "backend"]).assert().success();

    semiont(&dir)
        .args(["state", "clear", "-s", "backend"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared state for 'backend'"));
    assert!(!state_file(&dir, "backend").exists());

    semiont(&dir)
        .args(["check", "-s", "backend"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stopped"));
}

#[test]
fn environment_flag_selects_another_file() {
    let dir = mock_project(MOCK_ENV);
    std::fs::write(
        dir.path().join("environments/staging.json"),
        r#"{"default_platform": "mock", "services": {"api": {"type": "backend"}}}"#,
    )
    .unwrap();

    semiont(&dir)
        .args(["check", "-e", "staging"])
        .assert()
        .success()
        .stdout(predicate::str::contains("api"));
}
