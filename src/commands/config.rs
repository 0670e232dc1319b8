use super::{CommandResult, Outcome, gate_for, list_lines};
use crate::Result;
use crate::bootstrap::{self, ConfigInitReport, ConfigStatus, UpgradeMode};
use crate::config::Bundle;
use crate::launcher;
use crate::markers::MarkerStore;

impl CommandResult for ConfigInitReport {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Server config: {}", self.path.display())];
        if self.applied.is_empty() {
            lines.push("  No changes needed".to_string());
        } else {
            lines.push(list_lines(&self.applied, "  - "));
        }
        if let Some(secret) = &self.secret {
            lines.push(format!("  Secret: {}", secret));
        }
        for warning in &self.warnings {
            lines.push(format!("  Warning: {}", warning));
        }
        lines.join("\n")
    }
}

impl CommandResult for ConfigStatus {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Server config: {}", self.path.display()),
            format!("  Exists: {}", if self.exists { "yes" } else { "no" }),
            format!(
                "  Template: {}",
                if self.template_exists { "present" } else { "missing" }
            ),
            format!("  Next step: {}", self.decision.replace('_', " ")),
        ];
        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }
        lines.push(format!(
            "  Initialized: {}",
            if self.marked { "yes" } else { "no" }
        ));
        for warning in &self.warnings {
            lines.push(format!("  Warning: {}", warning));
        }
        lines.join("\n")
    }
}

/// Run the config reconciliation flow.
pub fn config_init(
    bundle: &Bundle,
    secret: Option<String>,
    yes: bool,
    non_interactive: bool,
    mode: UpgradeMode,
) -> Result<Outcome<ConfigInitReport>> {
    let mut gate = gate_for(secret, yes, non_interactive);
    Outcome::from_result(launcher::run_config_init(bundle, mode, gate.as_mut()))
}

/// Report the resolver's decision without writing anything.
pub fn config_status(bundle: &Bundle) -> Result<ConfigStatus> {
    let markers = MarkerStore::new(&bundle.paths.data_dir);
    bootstrap::config_status(&bundle.paths, &bundle.settings.secret, &markers)
}

/// Replace the server secret directly.
pub fn config_set_secret(bundle: &Bundle, secret: &str, yes: bool) -> Result<Outcome<ConfigInitReport>> {
    let markers = MarkerStore::new(&bundle.paths.data_dir);
    let mut gate = gate_for(None, yes, false);
    Outcome::from_result(bootstrap::set_secret(
        &bundle.paths,
        &bundle.settings.secret,
        &markers,
        secret,
        gate.as_mut(),
    ))
}
