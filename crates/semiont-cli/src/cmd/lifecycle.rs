use crate::output::{check_all_succeeded, print_results};
use anyhow::Context;
use clap::Args;
use semiont_core::config::{EnvironmentConfig, ProjectConfig};
use semiont_core::types::{CommandKind, PlatformType};
use semiont_platform::{CommandOptions, Orchestrator, SystemRunner};
use std::path::Path;
use std::sync::Arc;

/// Which services, in which environment, on which platform.
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Environment name (default: `default_environment` in semiont.yaml)
    #[arg(long, short = 'e', env = "SEMIONT_ENV")]
    pub environment: Option<String>,

    /// Service to act on; repeat for several. Omit or pass `all` for every service
    #[arg(long = "service", short = 's')]
    pub services: Vec<String>,

    /// Override the configured platform
    #[arg(long)]
    pub platform: Option<PlatformType>,

    /// Resolve handlers without running them
    #[arg(long)]
    pub dry_run: bool,
}

impl Target {
    pub fn options(&self) -> CommandOptions {
        CommandOptions {
            dry_run: self.dry_run,
            ..CommandOptions::default()
        }
    }

    /// Commands that act on one service refuse `all` and multiple `-s`.
    pub fn require_single(&self, command: &str) -> anyhow::Result<()> {
        match self.services.as_slice() {
            [one] if one != "all" => Ok(()),
            _ => anyhow::bail!("{command} needs exactly one --service"),
        }
    }

    fn resolve_services(&self, env: &EnvironmentConfig) -> anyhow::Result<Vec<String>> {
        if self.services.is_empty() || self.services.iter().any(|s| s == "all") {
            let all = env.service_names();
            if all.is_empty() {
                anyhow::bail!("environment '{}' defines no services", env.name);
            }
            return Ok(all);
        }
        let mut named = Vec::with_capacity(self.services.len());
        for s in &self.services {
            env.service(s)?;
            if !named.contains(s) {
                named.push(s.clone());
            }
        }
        Ok(named)
    }
}

/// Load the environment named on the command line, or the project default.
pub fn load_environment(root: &Path, name: Option<&str>) -> anyhow::Result<EnvironmentConfig> {
    let name = match name {
        Some(n) => n.to_string(),
        None => {
            ProjectConfig::load(root)
                .context("failed to load semiont.yaml")?
                .default_environment
        }
    };
    EnvironmentConfig::load(root, &name)
        .with_context(|| format!("failed to load environment '{name}'"))
}

pub fn run(
    root: &Path,
    target: &Target,
    command: CommandKind,
    options: CommandOptions,
    json: bool,
) -> anyhow::Result<()> {
    let env = Arc::new(load_environment(root, target.environment.as_deref())?);
    let services = target.resolve_services(&env)?;

    let orchestrator = Orchestrator::new(root, Arc::new(SystemRunner));
    let rt = tokio::runtime::Runtime::new()?;
    let results = rt
        .block_on(orchestrator.execute_many(&env, &services, command, &options, target.platform))
        .with_context(|| format!("{command} failed"))?;

    print_results(&results, json)?;
    check_all_succeeded(&results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use semiont_core::config::ServiceConfig;
    use semiont_core::types::ServiceType;

    fn target(services: &[&str]) -> Target {
        Target {
            environment: None,
            services: services.iter().map(|s| s.to_string()).collect(),
            platform: None,
            dry_run: false,
        }
    }

    fn env() -> EnvironmentConfig {
        let mut env = EnvironmentConfig::new("local");
        env.services
            .insert("frontend".into(), ServiceConfig::new(ServiceType::Frontend));
        env.services
            .insert("backend".into(), ServiceConfig::new(ServiceType::Backend));
        env
    }

    #[test]
    fn all_expands_in_name_order() {
        assert_eq!(
            target(&[]).resolve_services(&env()).unwrap(),
            vec!["backend", "frontend"]
        );
        assert_eq!(
            target(&["all"]).resolve_services(&env()).unwrap(),
            vec!["backend", "frontend"]
        );
    }

    #[test]
    fn named_services_keep_order_and_dedupe() {
        assert_eq!(
            target(&["frontend", "backend", "frontend"])
                .resolve_services(&env())
                .unwrap(),
            vec!["frontend", "backend"]
        );
    }

    #[test]
    fn unknown_service_is_an_error() {
        let err = target(&["worker"]).resolve_services(&env()).unwrap_err();
        assert!(err.to_string().contains("worker"));
    }

    #[test]
    fn single_service_commands() {
        assert!(target(&["backend"]).require_single("exec").is_ok());
        assert!(target(&[]).require_single("exec").is_err());
        assert!(target(&["all"]).require_single("exec").is_err());
        assert!(target(&["a", "b"]).require_single("exec").is_err());
    }
}
