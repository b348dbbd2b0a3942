//! End-to-end CLI tests for the sourcekit binary.
//!
//! Only commands that stay offline run here; the config directory points at
//! a temp dir so a developer's own config never leaks in.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn sourcekit(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sourcekit").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    sourcekit(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Browse content sites"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    sourcekit(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sourcekit"));
}

#[test]
fn test_binary_without_command_fails() {
    let home = TempDir::new().unwrap();
    sourcekit(&home)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_sources_lists_every_adapter() {
    let home = TempDir::new().unwrap();
    let output = sourcekit(&home).arg("sources").assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let listed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["desu", "newbie", "comx", "mangaalarab", "baozimanhua"]);
}

#[test]
fn test_filters_prints_schema_json() {
    let home = TempDir::new().unwrap();
    sourcekit(&home)
        .args(["filters", "desu"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"select\""))
        .stdout(predicate::str::contains("\"param\": \"order\""));
}

#[test]
fn test_unknown_source_fails_with_available_list() {
    let home = TempDir::new().unwrap();
    sourcekit(&home)
        .args(["filters", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown source 'nope'"))
        .stderr(predicate::str::contains("desu"));
}

#[test]
fn test_invalid_filter_fails_before_network() {
    let home = TempDir::new().unwrap();
    sourcekit(&home)
        .args(["search", "desu", "naruto", "-f", "order=bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid filter"));
}

#[test]
fn test_bad_config_file_is_reported() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("broken.toml");
    std::fs::write(&config, "no_such_key = 1\n").unwrap();
    sourcekit(&home)
        .arg("--config")
        .arg(&config)
        .arg("sources")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_quiet_flag_accepted() {
    let home = TempDir::new().unwrap();
    sourcekit(&home)
        .args(["-q", "sources"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty());
}
