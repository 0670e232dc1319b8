use super::{CommandResult, Outcome, gate_for};
use crate::Result;
use crate::bootstrap::{self, DataDirAction, DbInitReport};
use crate::config::Bundle;
use crate::launcher;
use crate::reconcile::writer::Strategy;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

impl CommandResult for DbInitReport {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let action = match self.data_dir_action {
            DataDirAction::Created => "created",
            DataDirAction::Reused => "reused (was empty)",
            DataDirAction::Wiped => "wiped and re-initialized",
        };
        [
            "MySQL initialized".to_string(),
            format!("  Data directory: {} ({})", self.data_dir.display(), action),
            format!("  Database: {}", self.database),
            format!("  Root password: {} (saved to {})", self.password, self.password_file.display()),
            format!("  Backend config: {}", self.backend_config.display()),
        ]
        .join("\n")
    }
}

/// Bootstrap the bundled database.
pub fn db_init(bundle: &Bundle, yes: bool, timeout: Option<u64>) -> Result<Outcome<DbInitReport>> {
    let mut bundle = bundle.clone();
    if let Some(secs) = timeout {
        bundle.settings.mysql.init_timeout = Duration::from_secs(secs);
    }
    let mut gate = gate_for(None, yes, false);
    Outcome::from_result(launcher::run_db_init(&bundle, gate.as_mut()))
}

#[derive(Debug, Serialize)]
pub struct PasswordWritten {
    pub path: PathBuf,
    pub change: String,
}

impl CommandResult for PasswordWritten {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        format!("Updated {}: {}", self.path.display(), self.change)
    }
}

/// Write a database password into the backend datasource config.
pub fn db_write_password(bundle: &Bundle, password: &str) -> Result<PasswordWritten> {
    let outcome = bootstrap::write_backend_password(&bundle.paths, password)?;
    let change = match outcome.strategy {
        Strategy::PlaceholderReplaced { line } | Strategy::KeyReplaced { line } => {
            format!("password replaced at line {}", line)
        }
        Strategy::KeyInserted { line } => format!("password inserted at line {}", line),
        Strategy::Unchanged => "already set".to_string(),
        _ => "password written".to_string(),
    };
    Ok(PasswordWritten {
        path: outcome.path,
        change,
    })
}
