use anyhow::Context;
use semiont_core::config::{EnvironmentConfig, ProjectConfig};
use semiont_core::types::PlatformType;
use semiont_core::{io, paths};
use std::path::Path;

pub fn run(
    root: &Path,
    name: Option<&str>,
    environment: &str,
    platform: PlatformType,
) -> anyhow::Result<()> {
    paths::validate_name(environment)?;
    let project_name = name.map(str::to_string).unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "semiont".to_string())
    });

    println!("Initializing semiont in: {}", root.display());

    let config_path = paths::project_config_path(root);
    if !config_path.exists() {
        let mut cfg = ProjectConfig::new(&project_name);
        cfg.default_environment = environment.to_string();
        cfg.save(root)
            .with_context(|| format!("failed to write {}", paths::PROJECT_FILE))?;
        println!("  created: {}", paths::PROJECT_FILE);
    } else {
        println!("  exists:  {}", paths::PROJECT_FILE);
    }

    let existing = paths::environment_candidates(root, environment)
        .into_iter()
        .find(|p| p.exists());
    match existing {
        Some(path) => println!("  exists:  {}", relative(root, &path)),
        None => {
            let mut env = EnvironmentConfig::new(environment);
            env.default_platform = Some(platform);
            env.save(root)
                .with_context(|| format!("failed to write environment '{environment}'"))?;
            println!("  created: {}/{environment}.yaml", paths::ENVIRONMENTS_DIR);
        }
    }

    let state_dir = root.join(paths::SEMIONT_DIR);
    io::ensure_dir(&state_dir)
        .with_context(|| format!("failed to create {}", state_dir.display()))?;
    io::ensure_gitignore_entry(root, &format!("{}/", paths::SEMIONT_DIR))
        .context("failed to update .gitignore")?;

    println!("\nsemiont initialized.");
    println!(
        "Next: add services to {}/{environment}.yaml, then run `semiont check`",
        paths::ENVIRONMENTS_DIR
    );
    Ok(())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
