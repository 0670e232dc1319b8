//! KDL schema for `launcher.kdl`.
//!
//! This module provides:
//! - Rust structs for the operator-tunable settings
//! - Parsing from a KDL document
//! - Default values matching the shipped bundle

use crate::{Error, Result};
use kdl::{KdlDocument, KdlNode};
use std::path::Path;
use std::time::Duration;

/// What to do when the required section has no `url` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingUrlPolicy {
    /// Log a warning and keep going (the server falls back to its default url)
    #[default]
    Warn,
    /// Treat the section as outdated and offer a schema upgrade
    Upgrade,
}

impl MissingUrlPolicy {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "warn" => Some(MissingUrlPolicy::Warn),
            "upgrade" => Some(MissingUrlPolicy::Upgrade),
            _ => None,
        }
    }
}

/// Where remote version information comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UpdateSource {
    /// Commit history of the bundle's git remote
    #[default]
    Git,
    /// Latest GitHub release tag
    Release,
}

impl UpdateSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "git" => Some(UpdateSource::Git),
            "release" => Some(UpdateSource::Release),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::Git => "git",
            UpdateSource::Release => "release",
        }
    }
}

/// Location and policy of the secret field in the server config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSettings {
    /// Top-level section holding the secret
    pub section: String,
    pub secret_key: String,
    pub url_key: String,
    /// Url written when the whole section has to be appended
    pub default_url: String,
    /// Literal the template uses for an unset secret
    pub placeholder: String,
    pub missing_url: MissingUrlPolicy,
    /// Prompt attempts before giving up
    pub attempts: u32,
    /// How many lines above a `secret:` line the section header may sit
    pub search_window: usize,
}

impl Default for SecretSettings {
    fn default() -> Self {
        Self {
            section: "manager-api".to_string(),
            secret_key: "secret".to_string(),
            url_key: "url".to_string(),
            default_url: "http://127.0.0.1:8002/xiaozhi".to_string(),
            placeholder: "你的server.secret值".to_string(),
            missing_url: MissingUrlPolicy::Warn,
            attempts: 5,
            search_window: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlSettings {
    pub port: u16,
    pub database: String,
    pub ready_timeout: Duration,
    pub retry_interval: Duration,
    /// Upper bound for `mysqld --initialize-insecure`
    pub init_timeout: Duration,
    pub password_length: usize,
}

impl Default for MysqlSettings {
    fn default() -> Self {
        Self {
            port: 3306,
            database: "xiaozhi_esp32_server".to_string(),
            ready_timeout: Duration::from_secs(30),
            retry_interval: Duration::from_secs(2),
            init_timeout: Duration::from_secs(600),
            password_length: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSettings {
    pub source: UpdateSource,
    /// Faster fetch URL swapped in for `origin` during the check
    pub mirror_url: Option<String>,
    pub repo_owner: String,
    pub repo_name: String,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            source: UpdateSource::Git,
            mirror_url: Some(
                "https://ghfast.top/https://github.com/VanillaNahida/xiaozhi-server-onekey"
                    .to_string(),
            ),
            repo_owner: "VanillaNahida".to_string(),
            repo_name: "xiaozhi-server-full-module-onekey".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    /// Any 2xx/3xx/4xx answer here means the backend is serving
    pub probe_url: String,
    pub ready_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            probe_url: "http://127.0.0.1:8002/xiaozhi/".to_string(),
            ready_timeout: Duration::from_secs(90),
        }
    }
}

/// All operator settings from `launcher.kdl`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LauncherSettings {
    pub secret: SecretSettings,
    pub mysql: MysqlSettings,
    pub update: UpdateSettings,
    pub backend: BackendSettings,
}

impl LauncherSettings {
    /// Load settings from a KDL file.
    ///
    /// Returns defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let doc: KdlDocument = content.parse().map_err(|e: kdl::KdlError| Error::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
            line: None,
            column: None,
        })?;

        Self::from_kdl(&doc).map_err(|message| Error::Parse {
            path: path.to_path_buf(),
            message,
            line: None,
            column: None,
        })
    }

    /// Parse settings from a KDL document, starting from defaults.
    pub fn from_kdl(doc: &KdlDocument) -> std::result::Result<Self, String> {
        let mut settings = Self::default();

        if let Some(node) = doc.get("config") {
            for child in children(node) {
                let s = &mut settings.secret;
                match child.name().value() {
                    "section" => set_string(child, &mut s.section),
                    "secret-key" => set_string(child, &mut s.secret_key),
                    "url-key" => set_string(child, &mut s.url_key),
                    "default-url" => set_string(child, &mut s.default_url),
                    "placeholder" => set_string(child, &mut s.placeholder),
                    "missing-url" => {
                        if let Some(value) = get_string_arg(child) {
                            s.missing_url = MissingUrlPolicy::parse(&value).ok_or_else(|| {
                                format!("missing-url must be \"warn\" or \"upgrade\", got {:?}", value)
                            })?;
                        }
                    }
                    "secret-attempts" => {
                        if let Some(n) = get_int_arg(child) {
                            if n < 1 {
                                return Err(format!("secret-attempts must be >= 1, got {}", n));
                            }
                            s.attempts = n as u32;
                        }
                    }
                    "search-window" => {
                        if let Some(n) = get_int_arg(child) {
                            s.search_window = n.max(0) as usize;
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some(node) = doc.get("mysql") {
            for child in children(node) {
                let m = &mut settings.mysql;
                match child.name().value() {
                    "port" => {
                        if let Some(n) = get_int_arg(child) {
                            m.port = u16::try_from(n).map_err(|_| format!("invalid port {}", n))?;
                        }
                    }
                    "database" => set_string(child, &mut m.database),
                    "ready-timeout" => set_secs(child, &mut m.ready_timeout),
                    "retry-interval" => set_secs(child, &mut m.retry_interval),
                    "init-timeout" => set_secs(child, &mut m.init_timeout),
                    "password-length" => {
                        if let Some(n) = get_int_arg(child) {
                            if n < 8 {
                                return Err(format!("password-length must be >= 8, got {}", n));
                            }
                            m.password_length = n as usize;
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some(node) = doc.get("update") {
            for child in children(node) {
                let u = &mut settings.update;
                match child.name().value() {
                    "source" => {
                        if let Some(value) = get_string_arg(child) {
                            u.source = UpdateSource::parse(&value).ok_or_else(|| {
                                format!("update source must be \"git\" or \"release\", got {:?}", value)
                            })?;
                        }
                    }
                    "mirror" => {
                        // An empty string disables the mirror swap
                        u.mirror_url = get_string_arg(child).filter(|s| !s.is_empty());
                    }
                    "repo-owner" => set_string(child, &mut u.repo_owner),
                    "repo-name" => set_string(child, &mut u.repo_name),
                    _ => {}
                }
            }
        }

        if let Some(node) = doc.get("backend") {
            for child in children(node) {
                let b = &mut settings.backend;
                match child.name().value() {
                    "probe-url" => set_string(child, &mut b.probe_url),
                    "ready-timeout" => set_secs(child, &mut b.ready_timeout),
                    _ => {}
                }
            }
        }

        Ok(settings)
    }
}

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

/// Get a string argument from a node's first entry.
fn get_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Get an integer argument from a node's first entry.
fn get_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries().first().and_then(|e| e.value().as_integer())
}

fn set_string(node: &KdlNode, target: &mut String) {
    if let Some(value) = get_string_arg(node) {
        *target = value;
    }
}

fn set_secs(node: &KdlNode, target: &mut Duration) {
    if let Some(n) = get_int_arg(node) {
        *target = Duration::from_secs(n.max(0) as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_bundle() {
        let settings = LauncherSettings::default();
        assert_eq!(settings.secret.section, "manager-api");
        assert_eq!(settings.secret.placeholder, "你的server.secret值");
        assert_eq!(settings.secret.attempts, 5);
        assert_eq!(settings.mysql.port, 3306);
        assert_eq!(settings.mysql.database, "xiaozhi_esp32_server");
        assert_eq!(settings.update.source, UpdateSource::Git);
    }

    #[test]
    fn test_parse_overrides() {
        let kdl = r#"
            config {
                placeholder "CHANGE_ME"
                missing-url "upgrade"
                secret-attempts 3
            }
            mysql {
                port 3307
                ready-timeout 10
            }
            update {
                source "release"
                mirror ""
            }
        "#;
        let doc: KdlDocument = kdl.parse().unwrap();
        let settings = LauncherSettings::from_kdl(&doc).unwrap();

        assert_eq!(settings.secret.placeholder, "CHANGE_ME");
        assert_eq!(settings.secret.missing_url, MissingUrlPolicy::Upgrade);
        assert_eq!(settings.secret.attempts, 3);
        assert_eq!(settings.secret.section, "manager-api");
        assert_eq!(settings.mysql.port, 3307);
        assert_eq!(settings.mysql.ready_timeout, Duration::from_secs(10));
        assert_eq!(settings.update.source, UpdateSource::Release);
        assert_eq!(settings.update.mirror_url, None);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let doc: KdlDocument = r#"config { missing-url "ignore" }"#.parse().unwrap();
        let err = LauncherSettings::from_kdl(&doc).unwrap_err();
        assert!(err.contains("missing-url"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = LauncherSettings::load(&dir.path().join("launcher.kdl")).unwrap();
        assert_eq!(settings, LauncherSettings::default());
    }

    #[test]
    fn test_load_malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("launcher.kdl");
        std::fs::write(&path, "config { section \"unterminated }").unwrap();
        let err = LauncherSettings::load(&path).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
