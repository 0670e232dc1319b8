use super::{CommandResult, EXIT_UPDATE_REQUESTED, Outcome, gate_for};
use crate::cli::StartTarget;
use crate::config::Bundle;
use crate::gate::TerminalGate;
use crate::launcher::{self, LaunchOutcome, StartReport, StartState};
use crate::markers::{Marker, MarkerStore};
use crate::Result;
use serde::Serialize;

impl CommandResult for StartReport {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines: Vec<String> = self
            .services
            .iter()
            .map(|s| {
                let state = match s.state {
                    StartState::Started => "started",
                    StartState::AlreadyRunning => "already running",
                    StartState::Skipped => "skipped",
                    StartState::Failed => "FAILED",
                };
                let mut line = format!("{:<10} {}", s.service.as_str(), state);
                if let Some(pid) = s.pid {
                    line.push_str(&format!(" (pid {})", pid));
                }
                if let Some(detail) = &s.detail {
                    line.push_str(&format!(": {}", detail));
                }
                line
            })
            .collect();
        match self.backend_ready {
            Some(true) => lines.push("Backend is answering requests".to_string()),
            Some(false) => lines.push("Backend did not answer in time".to_string()),
            None => {}
        }
        lines.join("\n")
    }

    fn exit_code(&self) -> i32 {
        if self.all_ok() { 0 } else { 1 }
    }
}

impl CommandResult for LaunchOutcome {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        match self {
            LaunchOutcome::UpdateRequested => {
                "Update requested; nothing was started. Update the bundle and launch again."
                    .to_string()
            }
            LaunchOutcome::Exited { runs } if runs.is_empty() => "Bye".to_string(),
            LaunchOutcome::Exited { runs } => runs
                .iter()
                .map(StartReport::to_human)
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    fn exit_code(&self) -> i32 {
        match self {
            LaunchOutcome::UpdateRequested => EXIT_UPDATE_REQUESTED,
            LaunchOutcome::Exited { .. } => 0,
        }
    }
}

/// Full interactive launch sequence.
pub fn launch(bundle: &Bundle) -> Result<Outcome<LaunchOutcome>> {
    let mut gate = TerminalGate::stdio();
    Outcome::from_result(launcher::launch(bundle, &mut gate))
}

/// Service menu without the first-run and update steps.
pub fn menu(bundle: &Bundle) -> Result<LaunchOutcome> {
    launcher::check_bundle_path(bundle)?;
    let mut gate = TerminalGate::stdio();
    let runs = launcher::run_menu(bundle, &mut gate)?;
    Ok(LaunchOutcome::Exited { runs })
}

/// Start one service or all of them.
pub fn start(bundle: &Bundle, target: StartTarget, yes: bool) -> Result<StartReport> {
    launcher::check_bundle_path(bundle)?;
    let mut gate = gate_for(None, yes, false);
    Ok(match target.service() {
        None => launcher::start_all(bundle, gate.as_mut()),
        Some(kind) => StartReport {
            services: vec![launcher::start_service(kind, bundle, gate.as_mut())],
            backend_ready: None,
        },
    })
}

#[derive(Debug, Serialize)]
pub struct FirstRun {
    pub readme: std::path::PathBuf,
    /// The notes were shown and acknowledged on this run
    pub acknowledged: bool,
    pub already_done: bool,
}

impl CommandResult for FirstRun {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.already_done {
            "First-run notes were already acknowledged".to_string()
        } else {
            format!("Acknowledged {}", self.readme.display())
        }
    }
}

/// Show and acknowledge the first-run notes.
pub fn first_run(bundle: &Bundle, yes: bool) -> Result<Outcome<FirstRun>> {
    let markers = MarkerStore::new(&bundle.paths.data_dir);
    let already_done = markers.is_complete(Marker::FirstRun);
    let mut gate = gate_for(None, yes, false);
    Outcome::from_result(
        launcher::acknowledge_first_run(bundle, &markers, gate.as_mut()).map(|acknowledged| {
            FirstRun {
                readme: bundle.paths.readme_file.clone(),
                acknowledged,
                already_done,
            }
        }),
    )
}
