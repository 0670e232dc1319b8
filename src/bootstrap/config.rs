//! Server config initialization: get a usable secret into `.config.yaml`.

use crate::config::{BundlePaths, SecretSettings};
use crate::gate::{ConfirmationGate, acquire_secret, secret_verdict, Verdict};
use crate::markers::{Marker, MarkerStore};
use crate::reconcile::writer::write_atomic;
use crate::reconcile::{
    ApplyOutcome, Decision, FieldTarget, Mutation, Resolution, Resolver, RestoreStatus,
    SafeWriter, SectionTemplate, Snapshot, Strategy, WriteFailure, document, mask_secret,
};
use crate::{Error, Result};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// How an outdated config is brought up to the template's structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeMode {
    /// Back up the file and copy the template over it
    #[default]
    Replace,
    /// Append the missing section to the existing file
    Merge,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigInitReport {
    pub path: PathBuf,
    /// Decision taken before any change
    pub decision: &'static str,
    /// Writes performed, in order
    pub applied: Vec<String>,
    /// Masked preview of the secret now in the file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub warnings: Vec<String>,
    /// Whether the config_init marker is set afterwards
    pub marked: bool,
}

/// Read-only view of what `config init` would do.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigStatus {
    pub path: PathBuf,
    pub exists: bool,
    pub template_exists: bool,
    pub decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub warnings: Vec<String>,
    pub marked: bool,
}

pub fn decision_label(decision: &Decision) -> &'static str {
    match decision {
        Decision::CreateFromTemplate(_) => "create_from_template",
        Decision::UpgradeSchema(_) => "upgrade_schema",
        Decision::NeedsSecret(_) => "needs_secret",
        Decision::SecretPresentConfirmRequired(_) => "secret_present",
        Decision::UpToDate => "up_to_date",
    }
}

fn decision_detail(decision: &Decision) -> Option<String> {
    match decision {
        Decision::CreateFromTemplate(template) | Decision::UpgradeSchema(template) => {
            Some(template.display().to_string())
        }
        Decision::NeedsSecret(problem) => Some(problem.to_string()),
        Decision::SecretPresentConfirmRequired(preview) => Some(preview.clone()),
        Decision::UpToDate => None,
    }
}

fn strategy_label(outcome: &ApplyOutcome) -> String {
    match &outcome.strategy {
        Strategy::PlaceholderReplaced { line } => format!("placeholder replaced at line {}", line),
        Strategy::KeyReplaced { line } => format!("secret replaced at line {}", line),
        Strategy::KeyInserted { line } => format!("secret inserted at line {}", line),
        Strategy::SectionAppended => "section appended with secret".to_string(),
        Strategy::FileReplaced { backup: Some(backup) } => {
            format!("replaced from template, backup at {}", backup.display())
        }
        Strategy::FileReplaced { backup: None } => "created from template".to_string(),
        Strategy::SectionInserted => "section inserted".to_string(),
        Strategy::Unchanged => "unchanged".to_string(),
    }
}

fn resolve(paths: &BundlePaths, settings: &SecretSettings) -> Result<(Snapshot, Resolution)> {
    let snapshot = document::read(&paths.server_config)?;
    let resolution =
        Resolver::new(settings.clone(), paths.server_config_template.clone()).resolve(&snapshot);
    Ok((snapshot, resolution))
}

/// Describe the current config without touching it.
pub fn config_status(
    paths: &BundlePaths,
    settings: &SecretSettings,
    markers: &MarkerStore,
) -> Result<ConfigStatus> {
    let (snapshot, resolution) = resolve(paths, settings)?;
    Ok(ConfigStatus {
        path: paths.server_config.clone(),
        exists: matches!(snapshot, Snapshot::Present(_)),
        template_exists: paths.server_config_template.is_file(),
        decision: decision_label(&resolution.decision),
        detail: decision_detail(&resolution.decision),
        warnings: resolution.warnings.iter().map(ToString::to_string).collect(),
        marked: markers.is_complete(Marker::ConfigInit),
    })
}

/// Bring the server config to a state with a usable secret.
///
/// The secret is always obtained before the first write, so cancelling at
/// any prompt leaves the file and the markers exactly as they were. A write
/// or verification failure puts the file back as it was before the flow.
pub fn reconcile_config<G>(
    paths: &BundlePaths,
    settings: &SecretSettings,
    markers: &MarkerStore,
    mode: UpgradeMode,
    gate: &mut G,
) -> Result<ConfigInitReport>
where
    G: ConfirmationGate + ?Sized,
{
    let config = paths.server_config.as_path();
    let (_, resolution) = resolve(paths, settings)?;
    let warnings: Vec<String> = resolution.warnings.iter().map(ToString::to_string).collect();
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    let decision = decision_label(&resolution.decision);
    tracing::info!(decision, "config at {}", config.display());

    let (applied, secret) = with_rollback(config, || {
        let done = apply_decision(config, settings, mode, resolution.decision, gate)?;
        verify_complete(paths, settings)?;
        Ok(done)
    })?;
    markers.mark_complete(Marker::ConfigInit)?;
    tracing::info!("server config ready");

    Ok(ConfigInitReport {
        path: config.to_path_buf(),
        decision,
        applied,
        secret,
        warnings,
        marked: true,
    })
}

/// Replace a secret directly, with the same shape check as the prompt.
pub fn set_secret<G>(
    paths: &BundlePaths,
    settings: &SecretSettings,
    markers: &MarkerStore,
    value: &str,
    gate: &mut G,
) -> Result<ConfigInitReport>
where
    G: ConfirmationGate + ?Sized,
{
    let value = value.trim();
    match secret_verdict(&settings.placeholder)(value) {
        Verdict::Accept => {}
        Verdict::Confirm(question) => {
            if !gate.request_approval(&question)? {
                return Err(Error::Cancelled("weak secret not confirmed".to_string()));
            }
        }
        Verdict::Reject(reason) => return Err(Error::InvalidInput(reason)),
    }

    let config = paths.server_config.as_path();
    if matches!(document::read(config)?, Snapshot::Absent) {
        return Err(Error::NotFound(config.to_path_buf()));
    }

    let applied = with_rollback(config, || {
        let applied = vec![write_secret(&SafeWriter::new(), config, settings, value)?];
        verify_complete(paths, settings)?;
        Ok(applied)
    })?;
    markers.mark_complete(Marker::ConfigInit)?;

    Ok(ConfigInitReport {
        path: config.to_path_buf(),
        decision: "set_secret",
        applied,
        secret: Some(mask_secret(value)),
        warnings: Vec::new(),
        marked: true,
    })
}

/// Writes for one decision. Returns the applied steps and the masked secret.
fn apply_decision<G>(
    config: &Path,
    settings: &SecretSettings,
    mode: UpgradeMode,
    decision: Decision,
    gate: &mut G,
) -> Result<(Vec<String>, Option<String>)>
where
    G: ConfirmationGate + ?Sized,
{
    let writer = SafeWriter::new();
    let mut applied = Vec::new();
    let mut secret = None;

    match decision {
        Decision::CreateFromTemplate(template) => {
            require_template(&template)?;
            gate.notify(&format!(
                "No server config yet; it will be created from {}",
                template.display()
            ));
            let value = acquire_secret(gate, &settings.placeholder, settings.attempts)?;
            let outcome = writer.apply(config, &Mutation::ReplaceWholeFile { source: template })?;
            applied.push(strategy_label(&outcome));
            applied.push(write_secret(&writer, config, settings, &value)?);
            secret = Some(mask_secret(&value));
        }
        Decision::UpgradeSchema(template) => {
            let question = format!(
                "{} has no usable {} section. {}?",
                config.display(),
                settings.section,
                match mode {
                    UpgradeMode::Replace => "Back it up and replace it with the template",
                    UpgradeMode::Merge => "Add the missing section",
                }
            );
            if mode == UpgradeMode::Replace {
                require_template(&template)?;
            }
            if !gate.request_approval(&question)? {
                return Err(Error::Cancelled("config upgrade declined".to_string()));
            }
            let value = acquire_secret(gate, &settings.placeholder, settings.attempts)?;
            let mutation = match mode {
                UpgradeMode::Replace => Mutation::ReplaceWholeFile { source: template },
                UpgradeMode::Merge => Mutation::InsertSection(SectionTemplate {
                    name: settings.section.clone(),
                    entries: vec![(settings.url_key.clone(), settings.default_url.clone())],
                }),
            };
            let outcome = writer.apply(config, &mutation)?;
            applied.push(strategy_label(&outcome));
            applied.push(write_secret(&writer, config, settings, &value)?);
            secret = Some(mask_secret(&value));
        }
        Decision::NeedsSecret(problem) => {
            gate.notify(&format!("The server {}", problem));
            let value = acquire_secret(gate, &settings.placeholder, settings.attempts)?;
            applied.push(write_secret(&writer, config, settings, &value)?);
            secret = Some(mask_secret(&value));
        }
        Decision::SecretPresentConfirmRequired(preview) => {
            let question = format!("A server secret is already set ({}). Replace it?", preview);
            if gate.request_approval(&question)? {
                let value = acquire_secret(gate, &settings.placeholder, settings.attempts)?;
                applied.push(write_secret(&writer, config, settings, &value)?);
                secret = Some(mask_secret(&value));
            } else {
                secret = Some(preview);
            }
        }
        Decision::UpToDate => {}
    }
    Ok((applied, secret))
}

/// Run `flow`, putting `config` back to its prior bytes (or removing it if
/// it did not exist) when the flow fails after writing.
fn with_rollback<T>(config: &Path, flow: impl FnOnce() -> Result<T>) -> Result<T> {
    let original = match fs::read(config) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(Error::Io(e)),
    };
    let err = match flow() {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    let current = fs::read(config).ok();
    if current == original {
        return Err(err);
    }
    let restored = match &original {
        Some(bytes) => write_atomic(config, bytes),
        None => fs::remove_file(config),
    };
    match restored {
        Ok(()) => {
            tracing::warn!("config flow failed, restored {}", config.display());
            Err(err)
        }
        Err(e) => {
            tracing::error!("could not restore {}: {}", config.display(), e);
            Err(WriteFailure {
                path: config.to_path_buf(),
                reason: err.to_string(),
                backup: None,
                restore: RestoreStatus::Failed(e.to_string()),
            }
            .into())
        }
    }
}

fn require_template(template: &Path) -> Result<()> {
    if template.is_file() {
        Ok(())
    } else {
        Err(Error::NotFound(template.to_path_buf()))
    }
}

fn write_secret(
    writer: &SafeWriter,
    config: &Path,
    settings: &SecretSettings,
    value: &str,
) -> Result<String> {
    let outcome = writer.apply(
        config,
        &Mutation::ReplaceField {
            target: FieldTarget::secret(settings),
            value: value.to_string(),
        },
    )?;
    tracing::info!(secret = %mask_secret(value), "{}", strategy_label(&outcome));
    Ok(strategy_label(&outcome))
}

/// Re-read the file; the marker is only set when it now resolves cleanly.
fn verify_complete(paths: &BundlePaths, settings: &SecretSettings) -> Result<()> {
    let snapshot = document::read(&paths.server_config)?;
    let decision = Resolver::new(settings.clone(), paths.server_config_template.clone())
        .offer_rotation(false)
        .resolve(&snapshot)
        .decision;
    match decision {
        Decision::UpToDate => Ok(()),
        other => Err(Error::Other(format!(
            "{} is still incomplete after writing ({})",
            paths.server_config.display(),
            decision_detail(&other).unwrap_or_else(|| decision_label(&other).to_string())
        ))),
    }
}
