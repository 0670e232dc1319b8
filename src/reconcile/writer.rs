//! Safe Writer: minimal, backed-up mutations of text config files.
//!
//! Field edits work on the raw lines, not on a re-serialized tree, so
//! comments, key order, quoting, and line endings outside the edited line
//! are left exactly as they were. Every write lands through a temp file in
//! the same directory followed by a rename, so a crash mid-write never
//! leaves the target truncated.

use super::secret::yaml_scalar;
use crate::config::SecretSettings;
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Suffix of the backup made before a whole-file replacement.
pub const BACKUP_SUFFIX: &str = ".old";

/// Where a field lives and how to create it if it doesn't.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTarget {
    /// Header key of the enclosing section (matched textually)
    pub section: String,
    pub key: String,
    /// Literal whose line takes priority over everything else
    pub placeholder: Option<String>,
    /// Extra `key: value` lines written before `key` when the whole
    /// section has to be appended
    pub defaults: Vec<(String, String)>,
    /// Lines above a `key:` line in which the section header must appear
    pub window: usize,
    /// Whether a missing section may be appended at the end of the file
    pub allow_append: bool,
}

impl FieldTarget {
    pub fn new(section: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            key: key.into(),
            placeholder: None,
            defaults: Vec::new(),
            window: 5,
            allow_append: true,
        }
    }

    /// The server secret field, as configured.
    pub fn secret(settings: &SecretSettings) -> Self {
        Self {
            section: settings.section.clone(),
            key: settings.secret_key.clone(),
            placeholder: Some(settings.placeholder.clone()),
            defaults: vec![(settings.url_key.clone(), settings.default_url.clone())],
            window: settings.search_window,
            allow_append: true,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn no_append(mut self) -> Self {
        self.allow_append = false;
        self
    }
}

/// A top-level section rendered from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionTemplate {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

impl SectionTemplate {
    fn render(&self, newline: &str) -> String {
        let mut out = format!("{}:{}", self.name, newline);
        for (key, value) in &self.entries {
            out.push_str(&format!("  {}: {}{}", key, yaml_scalar(value), newline));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    ReplaceField { target: FieldTarget, value: String },
    /// Copy `source` over the target, keeping a `.old` backup
    ReplaceWholeFile { source: PathBuf },
    /// Append a top-level section if its header is not already present
    InsertSection(SectionTemplate),
}

/// Which path through the fallback chain a mutation took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// 1-based line numbers throughout
    PlaceholderReplaced { line: usize },
    KeyReplaced { line: usize },
    KeyInserted { line: usize },
    SectionAppended,
    FileReplaced { backup: Option<PathBuf> },
    SectionInserted,
    /// Content already matched; nothing written
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub path: PathBuf,
    pub strategy: Strategy,
}

/// What happened to the original file after a failed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreStatus {
    /// Failure happened before the original was touched
    NotAttempted,
    /// Original content is back, verified by digest
    Restored,
    Failed(String),
}

impl RestoreStatus {
    /// Whether the target still holds its original bytes.
    pub fn original_intact(&self) -> bool {
        !matches!(self, RestoreStatus::Failed(_))
    }
}

/// I/O failure during a mutation, with the outcome of the restore attempt.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub path: PathBuf,
    pub reason: String,
    pub backup: Option<PathBuf>,
    pub restore: RestoreStatus,
}

impl WriteFailure {
    fn before_backup(path: &Path, reason: impl ToString) -> Self {
        Self {
            path: path.to_path_buf(),
            reason: reason.to_string(),
            backup: None,
            restore: RestoreStatus::NotAttempted,
        }
    }
}

impl std::fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to write {}: {}", self.path.display(), self.reason)?;
        match (&self.restore, &self.backup) {
            (RestoreStatus::Restored, _) => write!(f, " (original restored from backup)"),
            (RestoreStatus::Failed(err), Some(backup)) => write!(
                f,
                "; restore also failed: {}. Recover manually from {}",
                err,
                backup.display()
            ),
            (RestoreStatus::Failed(err), None) => write!(f, "; restore also failed: {}", err),
            (RestoreStatus::NotAttempted, _) => Ok(()),
        }
    }
}

impl std::error::Error for WriteFailure {}

/// Applies [`Mutation`]s to files on disk.
#[derive(Default)]
pub struct SafeWriter {
    #[cfg(test)]
    after_backup: Option<Box<dyn Fn(&Path)>>,
}

impl SafeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one mutation to the file at `path`.
    pub fn apply(&self, path: &Path, mutation: &Mutation) -> Result<ApplyOutcome> {
        let strategy = match mutation {
            Mutation::ReplaceField { target, value } => self.replace_field(path, target, value)?,
            Mutation::ReplaceWholeFile { source } => self.replace_whole_file(path, source)?,
            Mutation::InsertSection(template) => self.insert_section(path, template)?,
        };
        tracing::debug!(path = %path.display(), ?strategy, "applied mutation");
        Ok(ApplyOutcome {
            path: path.to_path_buf(),
            strategy,
        })
    }

    fn replace_field(&self, path: &Path, target: &FieldTarget, value: &str) -> Result<Strategy> {
        if value.contains(['\n', '\r']) {
            return Err(Error::InvalidInput(format!(
                "value for {} must be a single line",
                target.key
            )));
        }
        let raw = read_existing(path)?;
        let (updated, strategy) = edit_field(&raw, target, value)?;
        if updated == raw {
            return Ok(Strategy::Unchanged);
        }
        check_still_parses(path, &raw, &updated)?;
        write_atomic(path, updated.as_bytes()).map_err(|e| WriteFailure::before_backup(path, e))?;
        Ok(strategy)
    }

    fn insert_section(&self, path: &Path, template: &SectionTemplate) -> Result<Strategy> {
        let raw = read_existing(path)?;
        if lines(&raw).any(|line| is_header(line_body(line), &template.name)) {
            return Ok(Strategy::Unchanged);
        }
        let newline = newline_style(&raw);
        let mut updated = raw.clone();
        if !updated.is_empty() {
            if !updated.ends_with('\n') {
                updated.push_str(newline);
            }
            updated.push_str(newline);
        }
        updated.push_str(&template.render(newline));
        check_still_parses(path, &raw, &updated)?;
        write_atomic(path, updated.as_bytes()).map_err(|e| WriteFailure::before_backup(path, e))?;
        Ok(Strategy::SectionInserted)
    }

    fn replace_whole_file(&self, path: &Path, source: &Path) -> Result<Strategy> {
        // Nothing is touched until the source is known to be usable
        let source_len = match fs::metadata(source) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(source.to_path_buf()));
            }
            Err(e) => return Err(Error::Io(e)),
        };
        if source_len == 0 {
            return Err(Error::InvalidInput(format!(
                "replacement source is empty: {}",
                source.display()
            )));
        }

        if !path.exists() {
            let bytes = fs::read(source)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_atomic(path, &bytes).map_err(|e| WriteFailure::before_backup(path, e))?;
            return Ok(Strategy::FileReplaced { backup: None });
        }

        let backup = backup_path(path);
        let original = fs::read(path).map_err(|e| WriteFailure::before_backup(path, e))?;
        rotate_backup(&backup).map_err(|e| WriteFailure::before_backup(path, e))?;
        if let Err(e) = write_atomic(&backup, &original) {
            let _ = fs::remove_file(&backup);
            return Err(WriteFailure::before_backup(path, format!("backup failed: {}", e)).into());
        }
        tracing::info!(backup = %backup.display(), "backed up {}", path.display());

        #[cfg(test)]
        if let Some(hook) = &self.after_backup {
            hook(source);
        }

        let copied = fs::read(source).and_then(|bytes| write_atomic(path, &bytes));
        match copied {
            Ok(()) => Ok(Strategy::FileReplaced {
                backup: Some(backup),
            }),
            Err(e) => {
                let restore = restore_from_backup(path, &backup, &original);
                match &restore {
                    RestoreStatus::Failed(err) => tracing::error!(
                        backup = %backup.display(),
                        "restore of {} failed: {}",
                        path.display(),
                        err
                    ),
                    _ => tracing::warn!("replacement failed, restored {}", path.display()),
                }
                Err(WriteFailure {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                    backup: Some(backup),
                    restore,
                }
                .into())
            }
        }
    }
}

/// Line-level field edit following the fallback chain.
///
/// 1. first line containing the placeholder
/// 2. an existing `key:` line whose section header sits within the window above it
/// 3. a new line right after the section header
/// 4. a new section appended at the end
fn edit_field(raw: &str, target: &FieldTarget, value: &str) -> Result<(String, Strategy)> {
    let newline = newline_style(raw);
    let mut lines: Vec<String> = lines(raw).map(str::to_string).collect();
    let rendered = yaml_scalar(value);
    let key_prefix = format!("{}:", target.key);

    if let Some(placeholder) = &target.placeholder {
        let hits: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line_body(line).contains(placeholder.as_str()))
            .map(|(i, _)| i)
            .collect();
        if hits.len() > 1 {
            return Err(Error::InvalidInput(format!(
                "placeholder {:?} appears {} times; refusing to guess which to replace",
                placeholder,
                hits.len()
            )));
        }
        if let Some(&i) = hits.first() {
            lines[i] = rewrite_line(&lines[i], &target.key, &rendered);
            return Ok((lines.concat(), Strategy::PlaceholderReplaced { line: i + 1 }));
        }
    }

    for i in 0..lines.len() {
        let body = line_body(&lines[i]);
        if !body.trim_start().starts_with(&key_prefix) {
            continue;
        }
        let key_indent = indent_of(body).len();
        let start = i.saturating_sub(target.window);
        let under_section = lines[start..i].iter().any(|line| {
            let header = line_body(line);
            is_header(header, &target.section) && indent_of(header).len() < key_indent
        });
        if under_section {
            lines[i] = rewrite_line(&lines[i], &target.key, &rendered);
            return Ok((lines.concat(), Strategy::KeyReplaced { line: i + 1 }));
        }
    }

    if let Some(h) = lines
        .iter()
        .position(|line| is_header(line_body(line), &target.section))
    {
        let header_indent = indent_of(line_body(&lines[h])).to_string();
        let indent = lines
            .get(h + 1)
            .map(|next| line_body(next))
            .filter(|next| !next.trim().is_empty())
            .map(indent_of)
            .filter(|next| next.len() > header_indent.len())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}  ", header_indent));
        if !lines[h].ends_with('\n') {
            lines[h].push_str(newline);
        }
        lines.insert(
            h + 1,
            format!("{}{}: {}{}", indent, target.key, rendered, newline),
        );
        return Ok((lines.concat(), Strategy::KeyInserted { line: h + 2 }));
    }

    if !target.allow_append {
        return Err(Error::InvalidInput(format!(
            "section {} not found",
            target.section
        )));
    }

    let mut out = lines.concat();
    if !out.is_empty() {
        if !out.ends_with('\n') {
            out.push_str(newline);
        }
        out.push_str(newline);
    }
    let mut entries = target.defaults.clone();
    entries.push((target.key.clone(), value.to_string()));
    out.push_str(
        &SectionTemplate {
            name: target.section.clone(),
            entries,
        }
        .render(newline),
    );
    Ok((out, Strategy::SectionAppended))
}

/// Refuse a line edit that would turn a parseable document into one that
/// no longer parses, e.g. a duplicated key.
fn check_still_parses(path: &Path, before: &str, after: &str) -> Result<()> {
    if serde_yaml::from_str::<serde_yaml::Value>(before).is_err() {
        return Ok(());
    }
    serde_yaml::from_str::<serde_yaml::Value>(after)
        .map(|_| ())
        .map_err(|e| {
            Error::InvalidInput(format!(
                "edit to {} refused, the result would not parse ({}); edit it by hand",
                path.display(),
                e
            ))
        })
}

fn lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.split_inclusive('\n')
}

/// Line content without its terminator.
fn line_body(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn terminator(line: &str) -> &str {
    &line[line_body(line).len()..]
}

fn indent_of(body: &str) -> &str {
    &body[..body.len() - body.trim_start().len()]
}

fn newline_style(raw: &str) -> &'static str {
    if raw.contains("\r\n") { "\r\n" } else { "\n" }
}

/// `name:` alone on its line, optionally followed by a comment.
fn is_header(body: &str, name: &str) -> bool {
    body.trim_start()
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix(':'))
        .is_some_and(|rest| {
            let rest = rest.trim();
            rest.is_empty() || rest.starts_with('#')
        })
}

fn rewrite_line(line: &str, key: &str, rendered: &str) -> String {
    let body = line_body(line);
    format!("{}{}: {}{}", indent_of(body), key, rendered, terminator(line))
}

fn read_existing(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(path.to_path_buf())),
        Err(e) => Err(Error::Io(e)),
    }
}

/// `<path>.old`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Move an existing backup aside so an earlier good copy is never overwritten.
fn rotate_backup(backup: &Path) -> io::Result<()> {
    if !backup.exists() {
        return Ok(());
    }
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
    let mut candidate = suffixed(backup, &stamp);
    let mut n = 1;
    while candidate.exists() {
        candidate = suffixed(backup, &format!("{}-{}", stamp, n));
        n += 1;
    }
    fs::rename(backup, &candidate)
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn restore_from_backup(path: &Path, backup: &Path, original: &[u8]) -> RestoreStatus {
    let expected = Sha256::digest(original);
    let result = fs::read(backup).and_then(|bytes| {
        if Sha256::digest(&bytes) != expected {
            return Err(io::Error::other("backup does not match original content"));
        }
        write_atomic(path, &bytes)?;
        let written = fs::read(path)?;
        if Sha256::digest(&written) != expected {
            return Err(io::Error::other("restored content does not match backup"));
        }
        Ok(())
    });
    match result {
        Ok(()) => RestoreStatus::Restored,
        Err(e) => RestoreStatus::Failed(e.to_string()),
    }
}

/// Write via a sibling temp file and rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
