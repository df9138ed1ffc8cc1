use crate::error::{Result, SemiontError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const PROJECT_FILE: &str = "semiont.yaml";
pub const ENVIRONMENTS_DIR: &str = "environments";

pub const SEMIONT_DIR: &str = ".semiont";
pub const STATE_DIR: &str = ".semiont/state";
pub const LOGS_DIR: &str = ".semiont/logs";
pub const BACKUPS_DIR: &str = ".semiont/backups";
pub const MOCK_DIR: &str = ".semiont/mock";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn project_config_path(root: &Path) -> PathBuf {
    root.join(PROJECT_FILE)
}

pub fn environments_dir(root: &Path) -> PathBuf {
    root.join(ENVIRONMENTS_DIR)
}

/// Candidate environment files in lookup order (YAML wins over JSON).
pub fn environment_candidates(root: &Path, env: &str) -> [PathBuf; 3] {
    let dir = environments_dir(root);
    [
        dir.join(format!("{env}.yaml")),
        dir.join(format!("{env}.yml")),
        dir.join(format!("{env}.json")),
    ]
}

pub fn state_dir(root: &Path, env: &str) -> PathBuf {
    root.join(STATE_DIR).join(env)
}

pub fn state_file(root: &Path, env: &str, service: &str) -> PathBuf {
    state_dir(root, env).join(format!("{service}.json"))
}

pub fn log_file(root: &Path, env: &str, service: &str) -> PathBuf {
    root.join(LOGS_DIR).join(env).join(format!("{service}.log"))
}

pub fn backups_dir(root: &Path, env: &str, service: &str) -> PathBuf {
    root.join(BACKUPS_DIR).join(env).join(service)
}

pub fn mock_dir(root: &Path, env: &str, service: &str) -> PathBuf {
    root.join(MOCK_DIR).join(env).join(service)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-_]*[a-z0-9]$|^[a-z0-9]$").expect("static regex")
    })
}

/// Environment and service names become path components, so they are
/// restricted to a conservative slug alphabet.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !name_re().is_match(name) {
        return Err(SemiontError::InvalidName(name.to_string()));
    }
    Ok(())
}

static BACKUP_ID_RE: OnceLock<Regex> = OnceLock::new();

fn backup_id_re() -> &'static Regex {
    BACKUP_ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static regex"))
}

/// Backup ids name files under the backups directory and appear in shell
/// scripts run inside helper containers. No separators, no leading dot.
pub fn validate_backup_id(id: &str) -> Result<()> {
    if id.len() > 128 || !backup_id_re().is_match(id) {
        return Err(SemiontError::InvalidBackupId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        for name in ["local", "backend", "staging-eu", "graph_db", "x1"] {
            validate_name(name).unwrap_or_else(|_| panic!("expected valid: {name}"));
        }
    }

    #[test]
    fn invalid_names() {
        for name in ["", "-dash", "trailing-", "Prod", "../etc", "has space"] {
            assert!(validate_name(name).is_err(), "expected invalid: {name}");
        }
    }

    #[test]
    fn backup_ids() {
        for id in ["20240101T000000123Z", "pre-restore-1", "nightly.v2", "B_1"] {
            validate_backup_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
        for id in ["", "../x", "a/b", ".hidden", "x;rm -rf /", "$(id)", "a b"] {
            assert!(validate_backup_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            state_file(root, "local", "backend"),
            PathBuf::from("/tmp/proj/.semiont/state/local/backend.json")
        );
        assert_eq!(
            log_file(root, "local", "backend"),
            PathBuf::from("/tmp/proj/.semiont/logs/local/backend.log")
        );
        assert_eq!(
            environment_candidates(root, "prod")[2],
            PathBuf::from("/tmp/proj/environments/prod.json")
        );
    }
}
