//! Persisted "last notified" state for the update notice.

use crate::reconcile::writer::write_atomic;
use crate::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCheckState {
    /// Local time the operator last asked not to be reminded
    #[serde(default, alias = "last_view_date")]
    pub last_shown: Option<NaiveDateTime>,
}

impl ReleaseCheckState {
    /// Load state; a missing or unreadable file means "never shown".
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())?;
        Ok(())
    }

    /// True unless the notice was snoozed within the last day.
    pub fn should_show(&self, now: NaiveDateTime) -> bool {
        match self.last_shown {
            None => true,
            Some(last) => last < now - chrono::Duration::days(1),
        }
    }
}
