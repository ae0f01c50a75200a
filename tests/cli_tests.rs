use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

fn recur_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("recur"))
}

fn init_config(config_path: &std::path::Path) {
    recur_cmd()
        .args(["-C", config_path.to_str().unwrap(), "init"])
        .assert()
        .success();
}

#[test]
fn test_help() {
    recur_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Recurring invoice scheduling engine",
        ));
}

#[test]
fn test_version() {
    recur_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("recur"));
}

#[test]
fn test_init_creates_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("recur-config");

    recur_cmd()
        .args(["-C", config_path.to_str().unwrap(), "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized recur config"));

    assert!(config_path.join("config.toml").exists());
    assert!(config_path.join("clients.toml").exists());
    assert!(config_path.join("definitions.toml").exists());
}

#[test]
fn test_init_fails_if_exists() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("recur-config");

    init_config(&config_path);

    recur_cmd()
        .args(["-C", config_path.to_str().unwrap(), "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_commands_require_init() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("missing");

    recur_cmd()
        .args(["-C", config_path.to_str().unwrap(), "definitions"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Run 'recur init'"));
}

#[test]
fn test_definitions_lists_template_entry() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("recur-config");
    init_config(&config_path);

    recur_cmd()
        .args(["-C", config_path.to_str().unwrap(), "definitions"])
        .assert()
        .success()
        .stdout(predicate::str::contains("monthly-retainer"))
        .stdout(predicate::str::contains("every month on day 31"))
        .stdout(predicate::str::contains("active"));
}

#[test]
fn test_schedule_previews_clamped_dates() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("recur-config");
    init_config(&config_path);

    // Template anchor is 2026-01-31; February clamps to its last day.
    recur_cmd()
        .args([
            "-C",
            config_path.to_str().unwrap(),
            "schedule",
            "monthly-retainer",
            "-n",
            "3",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("2026-01-31"))
        .stdout(predicate::str::contains("2026-02-28"))
        .stdout(predicate::str::contains("2026-03-31"));
}

#[test]
fn test_schedule_unknown_definition_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("recur-config");
    init_config(&config_path);

    recur_cmd()
        .args([
            "-C",
            config_path.to_str().unwrap(),
            "schedule",
            "no-such-definition",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_tick_generates_once_and_advances() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("recur-config");
    init_config(&config_path);
    let dir = config_path.to_str().unwrap();

    // First tick: the template definition is due as of Feb 1.
    recur_cmd()
        .args(["-C", dir, "tick", "--as-of", "2026-02-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated:            1"));

    recur_cmd()
        .args(["-C", dir, "log"])
        .assert()
        .success()
        .stdout(predicate::str::contains("INV-2026-0001"))
        .stdout(predicate::str::contains("monthly-retainer"));

    recur_cmd()
        .args(["-C", dir, "invoices"])
        .assert()
        .success()
        .stdout(predicate::str::contains("INV-2026-0001"))
        .stdout(predicate::str::contains("2026-01-31"));

    // Same instant again: the schedule advanced to Feb 28, nothing is due.
    recur_cmd()
        .args(["-C", dir, "tick", "--as-of", "2026-02-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated:            0"));

    recur_cmd()
        .args(["-C", dir, "tick", "--as-of", "2026-03-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated:            1"));
}

#[test]
fn test_tick_rejects_bad_instant() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("recur-config");
    init_config(&config_path);

    recur_cmd()
        .args([
            "-C",
            config_path.to_str().unwrap(),
            "tick",
            "--as-of",
            "not-a-date",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid instant"));
}

#[test]
fn test_status_reports_next_invoice() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("recur-config");
    init_config(&config_path);

    recur_cmd()
        .args(["-C", config_path.to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Definitions:      1"))
        .stdout(predicate::str::contains("Next invoice:     INV-"));
}
