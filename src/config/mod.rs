//! Bundle layout and launcher settings.
//!
//! Everything a component needs to locate bundled runtimes and files is
//! resolved once at process start into a [`Bundle`] and passed down
//! explicitly. Child processes receive their environment through
//! [`RuntimeEnv`]; the launcher's own environment is never modified.
//!
//! ## launcher.kdl - operator settings (optional)
//!
//! Located at `<root>/data/launcher.kdl`. Every node is optional; missing
//! values fall back to built-in defaults.
//!
//! ```kdl
//! config {
//!     section "manager-api"
//!     placeholder "你的server.secret值"
//!     missing-url "warn"   // or "upgrade"
//!     secret-attempts 5
//! }
//! mysql {
//!     port 3306
//!     ready-timeout 30
//! }
//! update {
//!     source "git"         // or "release"
//! }
//! ```
//!
//! ## Precedence
//!
//! For the bundle root: `--root` flag > `ONEKEY_ROOT` > executable directory
//! (when it contains `runtime/`) > current directory.

pub mod paths;
pub mod resolver;
pub mod schema;

pub use paths::{BundlePaths, RuntimeEnv};
pub use resolver::{ROOT_ENV, Resolved, ValueSource, resolve_root};
pub use schema::{
    BackendSettings, LauncherSettings, MissingUrlPolicy, MysqlSettings, SecretSettings,
    UpdateSettings, UpdateSource,
};

use crate::Result;
use std::path::PathBuf;

/// The resolved bundle: where it lives and how it is configured.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub paths: BundlePaths,
    pub settings: LauncherSettings,
    pub root_source: ValueSource,
}

impl Bundle {
    /// Resolve the bundle root and load `launcher.kdl` if present.
    pub fn resolve(root_flag: Option<PathBuf>) -> Result<Self> {
        let root = resolve_root(root_flag)?;
        let paths = BundlePaths::new(&root.value);
        let settings = LauncherSettings::load(&paths.settings_file)?;
        Ok(Self {
            paths,
            settings,
            root_source: root.source,
        })
    }

    /// Build a bundle from known parts (used by tests and embedders).
    pub fn from_parts(paths: BundlePaths, settings: LauncherSettings) -> Self {
        Self {
            paths,
            settings,
            root_source: ValueSource::CliFlag,
        }
    }

    /// Environment handed to every bundled child process.
    pub fn runtime_env(&self) -> RuntimeEnv {
        RuntimeEnv::from_paths(&self.paths)
    }
}
