//! Commit-history update source backed by the bundled git client.

use super::{Identifiers, VersionSource};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Compares the checked-out branch with `origin/<branch>`.
#[derive(Debug, Clone)]
pub struct GitSource {
    git: PathBuf,
    repo: PathBuf,
    /// Fetch URL swapped in for `origin` during the check
    mirror: Option<String>,
}

impl GitSource {
    pub fn new(git: PathBuf, repo: &Path, mirror: Option<String>) -> Self {
        Self {
            git,
            repo: repo.to_path_buf(),
            mirror,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.git)
            .args(args)
            .current_dir(&self.repo)
            .output()
            .map_err(|e| Error::Process(format!("failed to run {}: {}", self.git.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Process(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn hashes(&self, rev: &str) -> Result<Vec<String>> {
        Ok(self
            .run(&["log", "--pretty=format:%H", rev])?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn fetch(&self) -> Result<()> {
        let _guard = match &self.mirror {
            Some(mirror) => Some(RemoteUrlGuard::swap(self, mirror)?),
            None => None,
        };
        self.run(&["fetch", "origin"])?;
        Ok(())
    }
}

impl VersionSource for GitSource {
    fn name(&self) -> &'static str {
        "git"
    }

    fn identifiers(&self) -> Result<Identifiers> {
        let branch = self.run(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let branch = branch.trim();
        self.fetch()?;

        let local = self.hashes(branch)?;
        let remote_ref = format!("origin/{}", branch);
        let remote = self.hashes(&remote_ref).unwrap_or_else(|e| {
            tracing::warn!("remote branch {} unavailable: {}", remote_ref, e);
            Vec::new()
        });

        let summary = match remote.first() {
            Some(_) => self
                .run(&[
                    "log",
                    "-1",
                    "--date=format:%Y-%m-%d %H:%M:%S",
                    "--pretty=format:commit %H%nauthor %an <%ae>%ndate   %cd%n%n    %s",
                    &remote_ref,
                ])
                .ok(),
            None => None,
        };

        Ok(Identifiers {
            local,
            remote,
            summary,
        })
    }
}

/// Points `origin` at a mirror and puts the original URL back on drop,
/// whether the fetch succeeded or not.
struct RemoteUrlGuard<'a> {
    source: &'a GitSource,
    original: String,
}

impl<'a> RemoteUrlGuard<'a> {
    fn swap(source: &'a GitSource, mirror: &str) -> Result<Self> {
        let original = source.run(&["config", "--get", "remote.origin.url"])?;
        let original = original.trim().to_string();
        source.run(&["remote", "set-url", "origin", mirror])?;
        tracing::debug!(mirror, "fetching through mirror");
        Ok(Self { source, original })
    }
}

impl Drop for RemoteUrlGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self
            .source
            .run(&["remote", "set-url", "origin", &self.original])
        {
            tracing::error!(
                "could not restore origin url to {}: {}",
                self.original,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{UpdateStatus, check};
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn commit(dir: &Path, message: &str) {
        assert!(git(dir, &["commit", "--allow-empty", "-q", "-m", message]));
    }

    /// upstream repo + clone; returns None when git is unavailable
    fn setup() -> Option<(TempDir, PathBuf, PathBuf)> {
        let tmp = TempDir::new().unwrap();
        let upstream = tmp.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        if !git(&upstream, &["init", "-q", "-b", "main"]) {
            return None;
        }
        commit(&upstream, "first");
        let clone = tmp.path().join("bundle");
        assert!(git(
            tmp.path(),
            &["clone", "-q", upstream.to_str().unwrap(), clone.to_str().unwrap()]
        ));
        Some((tmp, upstream, clone))
    }

    #[test]
    fn test_up_to_date_clone() {
        let Some((_tmp, _upstream, clone)) = setup() else {
            return;
        };
        let source = GitSource::new(PathBuf::from("git"), &clone, None);
        let report = check(&source).unwrap();
        assert_eq!(report.status, UpdateStatus::UpToDate);
    }

    #[test]
    fn test_new_upstream_commits_detected() {
        let Some((_tmp, upstream, clone)) = setup() else {
            return;
        };
        commit(&upstream, "second");
        commit(&upstream, "third");

        let source = GitSource::new(PathBuf::from("git"), &clone, None);
        let report = check(&source).unwrap();
        match report.status {
            UpdateStatus::UpdateAvailable { new_count, .. } => assert_eq!(new_count, 2),
            other => panic!("expected update, got {:?}", other),
        }
        assert!(report.summary.unwrap().contains("third"));
    }

    #[test]
    fn test_mirror_swap_restores_origin_even_on_failure() {
        let Some((tmp, _upstream, clone)) = setup() else {
            return;
        };
        let before = GitSource::new(PathBuf::from("git"), &clone, None)
            .run(&["config", "--get", "remote.origin.url"])
            .unwrap();

        let bogus = tmp.path().join("no-such-mirror");
        let source = GitSource::new(
            PathBuf::from("git"),
            &clone,
            Some(bogus.to_string_lossy().into_owned()),
        );
        assert!(source.identifiers().is_err());

        let after = source
            .run(&["config", "--get", "remote.origin.url"])
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_not_a_repository_is_process_error() {
        let tmp = TempDir::new().unwrap();
        let source = GitSource::new(PathBuf::from("git"), tmp.path(), None);
        if let Err(e) = source.identifiers() {
            assert!(matches!(e, Error::Process(_)));
        }
    }
}
