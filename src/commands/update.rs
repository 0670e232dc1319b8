use super::{CommandResult, EXIT_UPDATE_REQUESTED};
use crate::Result;
use crate::config::{Bundle, UpdateSource};
use crate::gate::TerminalGate;
use crate::launcher;
use crate::update::{self, UpdateChoice, UpdateReport, UpdateStatus, short_id};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct UpdateCheck {
    #[serde(flatten)]
    pub report: UpdateReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice: Option<UpdateChoice>,
}

impl CommandResult for UpdateCheck {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let local = self.report.local.as_deref().map(short_id).unwrap_or("unknown");
        let mut lines = vec![format!("Update source: {} (local {})", self.report.source, local)];
        match &self.report.status {
            UpdateStatus::Unknown => lines.push("  No remote information available".to_string()),
            UpdateStatus::UpToDate => lines.push("  Up to date".to_string()),
            UpdateStatus::UpdateAvailable { new_count, latest } => {
                lines.push(format!(
                    "  {} new change(s), latest {}",
                    new_count,
                    short_id(latest)
                ));
                if let Some(summary) = &self.report.summary {
                    lines.push(format!("  {}", summary.replace('\n', "\n  ")));
                }
            }
        }
        if self.choice == Some(UpdateChoice::UpdateNow) {
            lines.push("Stop here and update the bundle before launching.".to_string());
        }
        lines.join("\n")
    }

    fn exit_code(&self) -> i32 {
        match self.choice {
            Some(UpdateChoice::UpdateNow) => EXIT_UPDATE_REQUESTED,
            _ => 0,
        }
    }
}

/// Check for updates, optionally offering to stop for one.
pub fn update_check(bundle: &Bundle, source: Option<UpdateSource>, no_prompt: bool) -> Result<UpdateCheck> {
    let source = source.unwrap_or(bundle.settings.update.source);
    let report = update::check(launcher::version_source(bundle, source).as_ref())?;
    let choice = if no_prompt {
        None
    } else {
        let mut gate = TerminalGate::stdio();
        let now = chrono::Local::now().naive_local();
        Some(update::offer_update(
            &report,
            &bundle.paths.release_state_file,
            &mut gate,
            now,
        )?)
    };
    Ok(UpdateCheck { report, choice })
}
