//! Common test utilities for onekey integration tests.
//!
//! Provides `TestEnv`, a throwaway bundle root that every command is pointed
//! at through `ONEKEY_ROOT`, so tests never touch a real bundle.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

pub const SECRET: &str = "f47ac10b-58cc-4372-a567-0e02b2c3d479";
pub const PLACEHOLDER: &str = "你的server.secret值";

/// Server config template as shipped with the bundle.
pub const TEMPLATE: &str = "\
# Server config fetched from the admin console
server:
  ip: 0.0.0.0
  port: 8000
manager-api:
  # Admin console address
  url: http://127.0.0.1:8002/xiaozhi
  # Copy server.secret from the admin console
  secret: 你的server.secret值
";

/// Backend datasource config (trimmed).
pub const APPLICATION_DEV: &str = "\
spring:
  datasource:
    druid:
      driver-class-name: com.mysql.cj.jdbc.Driver
      url: jdbc:mysql://127.0.0.1:3306/xiaozhi_esp32_server
      username: root
      password: 123456
";

/// An isolated bundle root.
pub struct TestEnv {
    pub root: TempDir,
}

impl TestEnv {
    /// Create an empty bundle root with a `data/` directory.
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("data")).unwrap();
        Self { root }
    }

    /// Get a Command for the onekey binary rooted at this bundle.
    ///
    /// Sets `ONEKEY_ROOT` per-command for parallel safety, and closes stdin
    /// so any unexpected prompt sees end of input instead of hanging.
    pub fn onekey(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_onekey"));
        cmd.current_dir(self.root.path());
        cmd.env("ONEKEY_ROOT", self.root.path());
        cmd.env_remove("ONEKEY_LOG");
        cmd.write_stdin("");
        cmd
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn data_path(&self) -> PathBuf {
        self.root.path().join("data")
    }

    pub fn server_dir(&self) -> PathBuf {
        self.root.path().join("src/main/xiaozhi-server")
    }

    pub fn server_config(&self) -> PathBuf {
        self.server_dir().join("data/.config.yaml")
    }

    pub fn backend_config(&self) -> PathBuf {
        self.root
            .path()
            .join("src/main/manager-api/src/main/resources/application-dev.yml")
    }

    pub fn write(&self, path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn write_template(&self) {
        self.write(&self.server_dir().join("config_from_api.yaml"), TEMPLATE);
    }

    pub fn write_server_config(&self, content: &str) {
        self.write(&self.server_config(), content);
    }

    pub fn read_server_config(&self) -> String {
        fs::read_to_string(self.server_config()).unwrap()
    }

    pub fn marker_exists(&self, file_name: &str) -> bool {
        self.data_path().join(file_name).exists()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
