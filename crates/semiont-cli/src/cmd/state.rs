use super::lifecycle::load_environment;
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use semiont_core::state::StateManager;
use std::path::Path;

#[derive(Subcommand)]
pub enum StateSubcommand {
    /// Show recorded resources for every service in an environment
    List {
        #[arg(long, short = 'e', env = "SEMIONT_ENV")]
        environment: Option<String>,
    },
    /// Forget the recorded resource of one service
    Clear {
        #[arg(long, short = 'e', env = "SEMIONT_ENV")]
        environment: Option<String>,
        #[arg(long, short = 's')]
        service: String,
    },
}

pub fn run(root: &Path, subcommand: StateSubcommand, json: bool) -> anyhow::Result<()> {
    let manager = StateManager::new(root);
    match subcommand {
        StateSubcommand::List { environment } => {
            let env = load_environment(root, environment.as_deref())?;
            let states = manager
                .list(&env.name)
                .with_context(|| format!("failed to list state for '{}'", env.name))?;
            if json {
                return print_json(&states);
            }
            if states.is_empty() {
                println!("No recorded state in '{}'.", env.name);
                return Ok(());
            }
            let rows = states
                .iter()
                .map(|s| {
                    vec![
                        s.service_name.clone(),
                        s.platform.to_string(),
                        s.resources.data.identifier(),
                        s.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    ]
                })
                .collect();
            print_table(&["SERVICE", "PLATFORM", "RESOURCE", "UPDATED"], rows);
            Ok(())
        }
        StateSubcommand::Clear {
            environment,
            service,
        } => {
            let env = load_environment(root, environment.as_deref())?;
            let removed = manager
                .clear(&env.name, &service)
                .with_context(|| format!("failed to clear state for '{service}'"))?;
            if json {
                return print_json(&serde_json::json!({ "service": service, "cleared": removed }));
            }
            if removed {
                println!("Cleared state for '{service}' in '{}'.", env.name);
            } else {
                println!("No state recorded for '{service}' in '{}'.", env.name);
            }
            Ok(())
        }
    }
}
