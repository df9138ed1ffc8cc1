use semiont_core::paths::PROJECT_FILE;
use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `SEMIONT_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `semiont.yaml`
/// 3. Walk upward from `cwd` looking for `.git/`
/// 4. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_root_from(&cwd)
}

fn find_root_from(start: &Path) -> PathBuf {
    let walk = |marker: &dyn Fn(&Path) -> bool| {
        start.ancestors().find(|dir| marker(dir)).map(Path::to_path_buf)
    };
    walk(&|dir| dir.join(PROJECT_FILE).is_file())
        .or_else(|| walk(&|dir| dir.join(".git").is_dir()))
        .unwrap_or_else(|| start.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_root(Some(dir.path())), dir.path());
    }

    #[test]
    fn project_file_beats_git() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let project = dir.path().join("deploy");
        std::fs::create_dir_all(project.join("services/api")).unwrap();
        std::fs::write(project.join(PROJECT_FILE), "project:\n  name: x\n").unwrap();

        assert_eq!(find_root_from(&project.join("services/api")), project);
    }

    #[test]
    fn falls_back_to_git_then_start() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_root_from(&nested), nested);

        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        assert_eq!(find_root_from(&nested), dir.path());
    }
}
