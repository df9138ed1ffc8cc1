mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::lifecycle::Target;
use cmd::secret::SecretSubcommand;
use cmd::state::StateSubcommand;
use semiont_core::types::{CommandKind, PlatformType};
use semiont_platform::CommandOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "semiont",
    about = "Deploy and operate semiont services on posix, container, AWS, external, and mock platforms",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from semiont.yaml or .git/)
    #[arg(long, global = true, env = "SEMIONT_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log debug detail to stderr
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create semiont.yaml and a first environment
    Init {
        /// Project name (default: the directory name)
        #[arg(long)]
        name: Option<String>,
        /// Environment to create
        #[arg(long, default_value = "local")]
        environment: String,
        /// Default platform for the new environment
        #[arg(long, default_value = "posix")]
        platform: PlatformType,
    },

    /// Start services
    Start(Target),

    /// Stop services (in reverse order)
    Stop {
        #[command(flatten)]
        target: Target,
        /// Kill immediately instead of waiting for a graceful shutdown
        #[arg(long)]
        force: bool,
    },

    /// Report whether services are running and healthy
    Check(Target),

    /// Create the infrastructure a service needs
    Provision(Target),

    /// Build and push service artifacts
    Publish {
        #[command(flatten)]
        target: Target,
        /// Image or artifact tag (default: latest)
        #[arg(long)]
        tag: Option<String>,
    },

    /// Back up service data
    Backup {
        #[command(flatten)]
        target: Target,
        /// Backup id (default: a UTC timestamp)
        #[arg(long)]
        name: Option<String>,
    },

    /// Restore service data from a backup
    Restore {
        #[command(flatten)]
        target: Target,
        /// Backup id (default: the most recent)
        #[arg(long)]
        backup: Option<String>,
        /// Take a backup of the current data first
        #[arg(long)]
        pre_backup: bool,
    },

    /// Run a service's test suite
    Test {
        #[command(flatten)]
        target: Target,
        /// Suite name passed to the test command
        #[arg(long)]
        suite: Option<String>,
    },

    /// Run a command inside a service
    Exec {
        #[command(flatten)]
        target: Target,
        /// Command and arguments, after `--`
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },

    /// Roll services to their latest build
    Update(Target),

    /// Show recent log lines
    Logs {
        #[command(flatten)]
        target: Target,
        /// Number of lines to show
        #[arg(long, default_value_t = semiont_platform::context::DEFAULT_LOG_TAIL)]
        tail: usize,
    },

    /// Manage service secrets
    Secret {
        #[command(subcommand)]
        subcommand: SecretSubcommand,
    },

    /// Inspect or clear recorded service state
    State {
        #[command(subcommand)]
        subcommand: StateSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let json = cli.json;
    let lifecycle = |target: &Target, command: CommandKind, options: CommandOptions| {
        cmd::lifecycle::run(&root, target, command, options, json)
    };

    let result = match cli.command {
        Commands::Init {
            name,
            environment,
            platform,
        } => cmd::init::run(&root, name.as_deref(), &environment, platform),
        Commands::Start(target) => lifecycle(&target, CommandKind::Start, target.options()),
        Commands::Stop { target, force } => lifecycle(
            &target,
            CommandKind::Stop,
            CommandOptions {
                force,
                ..target.options()
            },
        ),
        Commands::Check(target) => lifecycle(&target, CommandKind::Check, target.options()),
        Commands::Provision(target) => {
            lifecycle(&target, CommandKind::Provision, target.options())
        }
        Commands::Publish { target, tag } => lifecycle(
            &target,
            CommandKind::Publish,
            CommandOptions {
                tag,
                ..target.options()
            },
        ),
        Commands::Backup { target, name } => lifecycle(
            &target,
            CommandKind::Backup,
            CommandOptions {
                backup_id: name,
                ..target.options()
            },
        ),
        Commands::Restore {
            target,
            backup,
            pre_backup,
        } => lifecycle(
            &target,
            CommandKind::Restore,
            CommandOptions {
                backup_id: backup,
                pre_restore_backup: pre_backup,
                ..target.options()
            },
        ),
        Commands::Test { target, suite } => lifecycle(
            &target,
            CommandKind::Test,
            CommandOptions {
                suite,
                ..target.options()
            },
        ),
        Commands::Exec { target, args } => target.require_single("exec").and_then(|()| {
            lifecycle(
                &target,
                CommandKind::Exec,
                CommandOptions {
                    exec_args: args,
                    ..target.options()
                },
            )
        }),
        Commands::Update(target) => lifecycle(&target, CommandKind::Update, target.options()),
        Commands::Logs { target, tail } => lifecycle(
            &target,
            CommandKind::Logs,
            CommandOptions {
                tail: Some(tail),
                ..target.options()
            },
        ),
        Commands::Secret { subcommand } => cmd::secret::run(&root, subcommand, json),
        Commands::State { subcommand } => cmd::state::run(&root, subcommand, json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
