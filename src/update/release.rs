//! Release-tag update source backed by the GitHub releases API.

use super::{Identifiers, VersionSource};
use crate::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// GitHub API base URL
const GITHUB_API_BASE: &str = "https://api.github.com";

/// User-Agent header required by GitHub API
const USER_AGENT: &str = "onekey-launcher";

#[derive(Debug, Error)]
pub enum ReleaseError {
    /// Repository has no published release (404)
    #[error("No published release found for {0}")]
    NoRelease(String),

    /// Unauthenticated rate limit hit (403)
    #[error("GitHub API rate limit exceeded, try again later")]
    RateLimited,

    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Failed to parse GitHub response: {0}")]
    ParseError(String),
}

impl From<ReleaseError> for Error {
    fn from(e: ReleaseError) -> Self {
        Error::Http(e.to_string())
    }
}

/// Fields of `GET /repos/{owner}/{repo}/releases/latest` we use.
#[derive(Debug, Clone, Deserialize)]
pub struct LatestRelease {
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub published_at: Option<String>,
    pub html_url: Option<String>,
}

impl LatestRelease {
    /// Operator-facing release notes.
    pub fn summary(&self) -> String {
        let mut text = format!(
            "New release: {}\nVersion: {}\n",
            self.name.as_deref().unwrap_or("(untitled)"),
            self.tag_name
        );
        if let Some(published) = self.published_at.as_deref().and_then(local_date) {
            text.push_str(&format!("Published: {}\n", published));
        }
        if let Some(url) = &self.html_url {
            text.push_str(&format!("Details: {}\n", url));
        }
        text.push('\n');
        text.push_str(self.body.as_deref().unwrap_or("(no release notes)"));
        text
    }
}

fn local_date(rfc3339: &str) -> Option<String> {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .ok()
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
}

/// Contents of `<root>/version.json`.
#[derive(Debug, Deserialize)]
struct VersionFile {
    version: String,
}

/// Read the bundle's own version tag. Missing file means unknown.
pub fn read_local_version(path: &Path) -> Result<Option<String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    let file: VersionFile = serde_json::from_str(&content).map_err(|e| Error::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
        line: Some(e.line()),
        column: Some(e.column()),
    })?;
    let version = file.version.trim().to_string();
    Ok((!version.is_empty()).then_some(version))
}

/// Compares `version.json` with the latest published release.
#[derive(Debug, Clone)]
pub struct ReleaseSource {
    api_base: String,
    owner: String,
    repo: String,
    version_file: PathBuf,
    timeout: Duration,
}

impl ReleaseSource {
    pub fn new(owner: &str, repo: &str, version_file: &Path) -> Self {
        Self {
            api_base: GITHUB_API_BASE.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            version_file: version_file.to_path_buf(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Point at a different API host (GitHub Enterprise, tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn latest_release(&self) -> std::result::Result<LatestRelease, ReleaseError> {
        let url = format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        );

        let response = ureq::get(&url)
            .timeout(self.timeout)
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", USER_AGENT)
            .set("X-GitHub-Api-Version", "2022-11-28")
            .call();

        match response {
            Ok(resp) => resp
                .into_json()
                .map_err(|e| ReleaseError::ParseError(e.to_string())),
            Err(ureq::Error::Status(404, _)) => Err(ReleaseError::NoRelease(format!(
                "{}/{}",
                self.owner, self.repo
            ))),
            Err(ureq::Error::Status(403, _)) => Err(ReleaseError::RateLimited),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(ReleaseError::HttpError(format!("HTTP {}: {}", code, body)))
            }
            Err(e) => Err(ReleaseError::HttpError(e.to_string())),
        }
    }
}

impl VersionSource for ReleaseSource {
    fn name(&self) -> &'static str {
        "release"
    }

    fn identifiers(&self) -> Result<Identifiers> {
        let local = read_local_version(&self.version_file)?;
        let release = self.latest_release()?;
        Ok(Identifiers {
            local: local.into_iter().collect(),
            remote: vec![release.tag_name.clone()],
            summary: Some(release.summary()),
        })
    }
}
