//! Integration tests for `onekey db`.
//!
//! The bundled MySQL binaries are not available here, so `db init` is only
//! exercised up to the point where it has to run them.

mod common;

use common::{APPLICATION_DEV, TestEnv};
use predicates::prelude::*;
use std::fs;

#[test]
fn test_write_password_replaces_druid_password() {
    let env = TestEnv::new();
    env.write(&env.backend_config(), APPLICATION_DEV);

    env.onekey()
        .args(["db", "write-password", "Xy7#pQ2!mN9$kL4@"])
        .assert()
        .success()
        .stdout(predicate::str::contains("password replaced at line 7"));

    let written = fs::read_to_string(env.backend_config()).unwrap();
    assert!(!written.contains("password: 123456"));
    assert!(written.contains("      password: "));
    assert!(written.contains("Xy7#pQ2!mN9$kL4@"));
    // Other datasource lines are untouched
    assert!(written.contains("      username: root\n"));
}

#[test]
fn test_write_password_missing_config() {
    let env = TestEnv::new();

    env.onekey()
        .args(["db", "write-password", "secret"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("application-dev.yml"));
}

#[test]
fn test_write_password_without_druid_section() {
    let env = TestEnv::new();
    let content = "spring:\n  datasource:\n    url: jdbc:mysql://localhost\n";
    env.write(&env.backend_config(), content);

    env.onekey()
        .args(["db", "write-password", "secret"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("druid"));

    assert_eq!(fs::read_to_string(env.backend_config()).unwrap(), content);
}

#[test]
fn test_db_init_without_mysql_binaries_fails_cleanly() {
    let env = TestEnv::new();

    env.onekey()
        .args(["db", "init", "--yes", "--timeout", "5"])
        .assert()
        .failure()
        .code(1);

    assert!(!env.marker_exists(".mysql_init_sucess"));
    assert!(!env.path().join("MySQL密码.txt").exists());
}
