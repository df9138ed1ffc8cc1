//! Built-in platform strategies and the helpers they share.

pub mod aws;
pub mod container;
pub mod external;
pub mod mock;
pub mod posix;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use semiont_core::results::LogEntry;

use crate::strategy::PlatformStrategy;
use crate::{PlatformError, Result};

pub fn builtin() -> Vec<Arc<dyn PlatformStrategy>> {
    vec![
        Arc::new(posix::PosixStrategy),
        Arc::new(container::ContainerStrategy),
        Arc::new(aws::AwsStrategy),
        Arc::new(external::ExternalStrategy),
        Arc::new(mock::MockStrategy),
    ]
}

// ---------------------------------------------------------------------------
// Backup files
// ---------------------------------------------------------------------------

pub(crate) const BACKUP_EXTENSIONS: &[&str] = &["dump", "tar.gz", "json"];

/// Id of a backup file name, if it carries one of [`BACKUP_EXTENSIONS`].
fn backup_id_of(file_name: &str) -> Option<&str> {
    BACKUP_EXTENSIONS
        .iter()
        .find_map(|ext| file_name.strip_suffix(&format!(".{ext}")[..]))
        .filter(|id| !id.is_empty())
}

/// Resolve `id` to a file in `dir`, or the most recently written backup when
/// `id` is `None`.
pub(crate) fn locate_backup(dir: &Path, id: Option<&str>) -> Result<(String, PathBuf)> {
    if let Some(id) = id {
        semiont_core::paths::validate_backup_id(id)?;
        return BACKUP_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{id}.{ext}")))
            .find(|p| p.is_file())
            .map(|p| (id.to_string(), p))
            .ok_or_else(|| PlatformError::Rejected(format!("backup '{id}' not found")));
    }

    let mut newest: Option<(std::time::SystemTime, String, PathBuf)> = None;
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = backup_id_of(&name) else {
                continue;
            };
            let modified = entry.metadata()?.modified()?;
            let newer = match &newest {
                Some((t, prev, _)) => (modified, id) > (*t, prev.as_str()),
                None => true,
            };
            if newer {
                newest = Some((modified, id.to_string(), entry.path()));
            }
        }
    }
    newest
        .map(|(_, id, path)| (id, path))
        .ok_or_else(|| PlatformError::Rejected(format!("no backups found in {}", dir.display())))
}

/// Refuse to reuse an id that already names a backup in `dir`.
pub(crate) fn ensure_new_backup(dir: &Path, id: &str) -> Result<()> {
    let taken = BACKUP_EXTENSIONS
        .iter()
        .any(|ext| dir.join(format!("{id}.{ext}")).exists());
    if taken {
        return Err(PlatformError::Rejected(format!("backup '{id}' already exists")));
    }
    Ok(())
}

/// `base` with `path` appended, avoiding a doubled or missing slash.
pub(crate) fn join_url(base: &str, path: Option<&str>) -> String {
    match path {
        Some(p) if !p.is_empty() => {
            format!("{}/{}", base.trim_end_matches('/'), p.trim_start_matches('/'))
        }
        _ => base.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Log lines
// ---------------------------------------------------------------------------

/// Split a leading ISO-8601 timestamp (`2024-05-01T10:00:00...`) off a line.
pub(crate) fn log_entry(source: &str, line: &str) -> LogEntry {
    let (timestamp, message) = match line.split_once(char::is_whitespace) {
        Some((first, rest)) if looks_like_timestamp(first) => {
            (Some(first.to_string()), rest.trim_start().to_string())
        }
        _ => (None, line.to_string()),
    };
    LogEntry {
        timestamp,
        source: source.to_string(),
        message,
    }
}

fn looks_like_timestamp(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 10 && b[..4].iter().all(u8::is_ascii_digit) && b[4] == b'-' && b[7] == b'-'
}

/// Last `n` non-empty lines as log entries.
pub(crate) fn tail_entries(source: &str, text: &str, n: usize) -> Vec<LogEntry> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|l| log_entry(source, l)).collect()
}
