//! Bundle root resolution with source tracking.
//!
//! ## Root Precedence (highest to lowest)
//!
//! 1. `--root` / `-C` CLI flag
//! 2. `ONEKEY_ROOT` environment variable
//! 3. Directory of the running executable, if it contains `runtime/`
//! 4. Current working directory

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable name for the bundle root override.
pub const ROOT_ENV: &str = "ONEKEY_ROOT";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Derived from the executable location
    ExeDir,
    /// Current working directory
    CurrentDir,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ExeDir => write!(f, "exe-dir"),
            ValueSource::CurrentDir => write!(f, "cwd"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Resolve the bundle root directory.
///
/// An explicit root (flag or env var) must exist; it is used literally.
pub fn resolve_root(flag: Option<PathBuf>) -> Result<Resolved<PathBuf>> {
    let env_value = std::env::var_os(ROOT_ENV).map(PathBuf::from);
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    let cwd = std::env::current_dir()?;
    resolve_root_from(flag, env_value, exe_dir, cwd)
}

/// Pure resolution step, separated for testing.
pub fn resolve_root_from(
    flag: Option<PathBuf>,
    env_value: Option<PathBuf>,
    exe_dir: Option<PathBuf>,
    cwd: PathBuf,
) -> Result<Resolved<PathBuf>> {
    let explicit = flag
        .map(|p| Resolved::new(p, ValueSource::CliFlag))
        .or_else(|| env_value.map(|p| Resolved::new(p, ValueSource::EnvVar(ROOT_ENV.into()))));

    if let Some(resolved) = explicit {
        if !resolved.value.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Bundle root does not exist: {} (from {})",
                resolved.value.display(),
                resolved.source
            )));
        }
        return Ok(resolved);
    }

    if let Some(dir) = exe_dir {
        if dir.join("runtime").is_dir() {
            return Ok(Resolved::new(dir, ValueSource::ExeDir));
        }
        // Installed as <root>/bin/onekey.exe
        if let Some(parent) = dir.parent() {
            if parent.join("runtime").is_dir() {
                return Ok(Resolved::new(parent.to_path_buf(), ValueSource::ExeDir));
            }
        }
    }

    Ok(Resolved::new(cwd, ValueSource::CurrentDir))
}
