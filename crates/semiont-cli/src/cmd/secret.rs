use super::lifecycle::{self, Target};
use clap::Subcommand;
use semiont_core::types::CommandKind;
use semiont_platform::{CommandOptions, SecretAction};
use std::path::Path;

#[derive(Subcommand)]
pub enum SecretSubcommand {
    /// Print one secret value
    Get {
        #[command(flatten)]
        target: Target,
        key: String,
    },
    /// Create or replace a secret
    Set {
        #[command(flatten)]
        target: Target,
        key: String,
        value: String,
    },
    /// Remove a secret
    Delete {
        #[command(flatten)]
        target: Target,
        key: String,
    },
    /// List secret names (values are not shown)
    List {
        #[command(flatten)]
        target: Target,
    },
}

pub fn run(root: &Path, subcommand: SecretSubcommand, json: bool) -> anyhow::Result<()> {
    let (target, action) = match subcommand {
        SecretSubcommand::Get { target, key } => (target, SecretAction::Get { key }),
        SecretSubcommand::Set { target, key, value } => (target, SecretAction::Set { key, value }),
        SecretSubcommand::Delete { target, key } => (target, SecretAction::Delete { key }),
        SecretSubcommand::List { target } => (target, SecretAction::List),
    };
    target.require_single("secret")?;
    let options = CommandOptions {
        secret: Some(action),
        ..target.options()
    };
    lifecycle::run(root, &target, CommandKind::Secret, options, json)
}
