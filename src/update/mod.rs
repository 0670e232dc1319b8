//! Update checking for the bundle.
//!
//! Two sources of version identifiers feed the same comparator:
//! - [`GitSource`]: commit hashes of the local branch vs. its remote
//! - [`ReleaseSource`]: `version.json` vs. the latest published release
//!
//! The notification is shown through the confirmation gate at most once a
//! day (see [`state`]).

pub mod git;
pub mod release;
pub mod state;

pub use git::GitSource;
pub use release::{ReleaseError, ReleaseSource};
pub use state::ReleaseCheckState;

use crate::Result;
use crate::gate::ConfirmationGate;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

/// Result of comparing local and remote identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Remote list was empty; nothing can be concluded
    Unknown,
    UpToDate,
    UpdateAvailable { new_count: usize, latest: String },
}

/// Compare identifier lists. `remote` must be newest-first.
///
/// An update is available when the newest remote id is missing locally.
/// The count is a set difference by identity, not by position or time.
pub fn compare(local: &[String], remote: &[String]) -> UpdateStatus {
    let Some(latest) = remote.first() else {
        return UpdateStatus::Unknown;
    };
    if local.contains(latest) {
        return UpdateStatus::UpToDate;
    }
    UpdateStatus::UpdateAvailable {
        new_count: count_new(local, remote),
        latest: latest.clone(),
    }
}

/// Remote ids that do not appear anywhere in `local`.
pub fn count_new(local: &[String], remote: &[String]) -> usize {
    let known: HashSet<&str> = local.iter().map(String::as_str).collect();
    remote
        .iter()
        .filter(|id| !known.contains(id.as_str()))
        .count()
}

/// Identifiers collected by a source, plus text to show the operator.
#[derive(Debug, Clone, Default)]
pub struct Identifiers {
    pub local: Vec<String>,
    /// Newest first
    pub remote: Vec<String>,
    pub summary: Option<String>,
}

pub trait VersionSource {
    fn name(&self) -> &'static str;
    fn identifiers(&self) -> Result<Identifiers>;
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub source: &'static str,
    #[serde(flatten)]
    pub status: UpdateStatus,
    pub local: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Fetch identifiers from `source` and compare them.
pub fn check(source: &dyn VersionSource) -> Result<UpdateReport> {
    tracing::info!("checking for updates ({})", source.name());
    let ids = source.identifiers()?;
    let status = compare(&ids.local, &ids.remote);
    match &status {
        UpdateStatus::Unknown => tracing::warn!("remote has no versions; cannot tell"),
        UpdateStatus::UpToDate => tracing::info!("bundle is up to date"),
        UpdateStatus::UpdateAvailable { new_count, latest } => {
            tracing::info!(new_count, latest = %latest, "update available")
        }
    }
    Ok(UpdateReport {
        source: source.name(),
        status,
        local: ids.local.first().cloned(),
        summary: ids.summary,
    })
}

/// What the operator chose when offered an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateChoice {
    /// Nothing to offer, or already offered today
    NotOffered,
    Declined,
    /// Operator wants to update before starting anything
    UpdateNow,
}

/// Offer an available update through `gate`, at most once a day.
pub fn offer_update<G>(
    report: &UpdateReport,
    state_path: &Path,
    gate: &mut G,
    now: NaiveDateTime,
) -> Result<UpdateChoice>
where
    G: ConfirmationGate + ?Sized,
{
    let UpdateStatus::UpdateAvailable { new_count, latest } = &report.status else {
        return Ok(UpdateChoice::NotOffered);
    };

    let mut state = ReleaseCheckState::load(state_path);
    if !state.should_show(now) {
        tracing::info!("update notice already shown today");
        return Ok(UpdateChoice::NotOffered);
    }

    if let Some(summary) = &report.summary {
        gate.notify(summary);
    }
    let question = format!(
        "{} new change(s) available (latest {}). Stop and update now?",
        new_count,
        short_id(latest)
    );
    if gate.request_approval(&question)? {
        return Ok(UpdateChoice::UpdateNow);
    }

    if gate.request_approval("Don't remind me again today?")? {
        state.last_shown = Some(now);
        if let Err(e) = state.save(state_path) {
            tracing::warn!("could not save {}: {}", state_path.display(), e);
        }
    }
    Ok(UpdateChoice::Declined)
}

/// Abbreviate commit hashes; leave release tags alone.
pub fn short_id(id: &str) -> &str {
    if id.len() == 40 && id.chars().all(|c| c.is_ascii_hexdigit()) {
        &id[..8]
    } else {
        id
    }
}
