//! Marker files recording that a one-time bootstrap step completed.
//!
//! A marker is created only as the last step of a fully successful
//! sequence, so its presence is the single source of truth for "done".

use crate::reconcile::writer::write_atomic;
use crate::{Error, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// The one-time steps the launcher tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    FirstRun,
    ConfigInit,
    MysqlInit,
}

impl Marker {
    pub const ALL: [Marker; 3] = [Marker::FirstRun, Marker::ConfigInit, Marker::MysqlInit];

    /// File name inside the data directory.
    ///
    /// `mysql_init` keeps the historical spelling so existing installs are
    /// recognized.
    pub fn file_name(&self) -> &'static str {
        match self {
            Marker::FirstRun => ".is_first_run",
            Marker::ConfigInit => ".config_init_success",
            Marker::MysqlInit => ".mysql_init_sucess",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::FirstRun => "first_run",
            Marker::ConfigInit => "config_init",
            Marker::MysqlInit => "mysql_init",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Marker::ALL
            .into_iter()
            .find(|m| m.as_str() == s || m.file_name() == s)
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker files under one directory.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    /// # Arguments
    /// * `dir` - The bundle data directory (e.g., `<root>/data`)
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path(&self, marker: Marker) -> PathBuf {
        self.dir.join(marker.file_name())
    }

    pub fn is_complete(&self, marker: Marker) -> bool {
        self.path(marker).is_file()
    }

    /// Record completion. Calling it again is a no-op.
    ///
    /// The file appears atomically with a short timestamp line; callers must
    /// only reach this after every guarded mutation was durably written.
    pub fn mark_complete(&self, marker: Marker) -> Result<()> {
        if self.is_complete(marker) {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        let content = format!("{}\n", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
        write_atomic(&self.path(marker), content.as_bytes()).map_err(Error::Io)?;
        tracing::debug!(marker = %marker, "marked complete");
        Ok(())
    }

    /// Completion state of every known marker.
    pub fn list(&self) -> Vec<MarkerStatus> {
        Marker::ALL
            .into_iter()
            .map(|marker| MarkerStatus {
                marker,
                path: self.path(marker),
                complete: self.is_complete(marker),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkerStatus {
    pub marker: Marker,
    pub path: PathBuf,
    pub complete: bool,
}
