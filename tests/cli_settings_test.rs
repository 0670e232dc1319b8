//! Integration tests for `data/launcher.kdl` and bundle root resolution.

mod common;

use common::{SECRET, TestEnv};
use predicates::prelude::*;
use std::fs;

#[test]
fn test_malformed_settings_fail_every_command() {
    let env = TestEnv::new();
    fs::write(env.data_path().join("launcher.kdl"), "config {\n").unwrap();

    env.onekey()
        .args(["marker", "list"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("launcher.kdl"));
}

#[test]
fn test_invalid_missing_url_policy() {
    let env = TestEnv::new();
    fs::write(
        env.data_path().join("launcher.kdl"),
        "config {\n    missing-url \"ignore\"\n}\n",
    )
    .unwrap();

    env.onekey()
        .args(["config", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing-url"));
}

#[test]
fn test_custom_placeholder_is_honored() {
    let env = TestEnv::new();
    fs::write(
        env.data_path().join("launcher.kdl"),
        "config {\n    placeholder \"CHANGE-ME\"\n}\n",
    )
    .unwrap();
    let config = "manager-api:\n  url: http://127.0.0.1:8002/xiaozhi\n  secret: CHANGE-ME\n";
    env.write_server_config(config);

    env.onekey()
        .args(["config", "init", "--secret", SECRET])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""decision":"needs_secret""#));

    assert_eq!(
        env.read_server_config(),
        config.replace("CHANGE-ME", SECRET)
    );
}

#[test]
fn test_root_flag_wins_over_env() {
    let env = TestEnv::new();
    let other = TestEnv::new();
    fs::write(other.data_path().join(".is_first_run"), "").unwrap();

    env.onekey()
        .args(["-H", "--root", other.path().to_str().unwrap(), "marker", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[x] first_run"));
}

#[test]
fn test_missing_url_is_only_a_warning() {
    let env = TestEnv::new();
    env.write_server_config(&format!("manager-api:\n  secret: {}\n", SECRET));

    env.onekey()
        .args(["config", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""decision":"secret_present""#))
        .stdout(predicate::str::contains("has no url field"));
}
