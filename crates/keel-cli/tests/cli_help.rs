use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("keel")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_help_shows_subcommands() {
    cargo_bin_cmd!("keel")
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("path"))
        .stdout(predicate::str::contains("show"));
}

#[test]
fn test_config_path_prints_location() {
    cargo_bin_cmd!("keel")
        .env("KEEL_HOME", "/tmp/keel-test-home")
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_show_prints_defaults() {
    cargo_bin_cmd!("keel")
        .env("KEEL_HOME", "/tmp/keel-test-home-empty")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[cache]"))
        .stdout(predicate::str::contains("[logging]"));
}

#[test]
fn test_status_prints_memory_snapshot() {
    cargo_bin_cmd!("keel")
        .env("KEEL_HOME", "/tmp/keel-test-home-status")
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"memory\""))
        .stdout(predicate::str::contains("recommendation"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("keel")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.2"));
}
