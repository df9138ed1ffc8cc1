use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use semiont_core::config::{EnvironmentConfig, ServiceConfig};
use semiont_core::paths;
use semiont_core::requirements::ServiceRequirements;
use semiont_core::results::{ResultDetails, ResultHeader};
use semiont_core::state::{PlatformResources, ResourceData, ServiceState, StateManager};
use semiont_core::types::{CommandKind, PlatformType};

use crate::shell::{run_checked, CommandRunner, ShellCommand, ShellOutput};
use crate::Result;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretAction {
    Get { key: String },
    Set { key: String, value: String },
    Delete { key: String },
    List,
}

impl SecretAction {
    pub fn name(&self) -> &'static str {
        match self {
            SecretAction::Get { .. } => "get",
            SecretAction::Set { .. } => "set",
            SecretAction::Delete { .. } => "delete",
            SecretAction::List => "list",
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            SecretAction::Get { key } | SecretAction::Set { key, .. } | SecretAction::Delete { key } => {
                Some(key)
            }
            SecretAction::List => None,
        }
    }
}

/// Flags collected from the command line. Each handler reads the ones that
/// apply to it and ignores the rest.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub dry_run: bool,
    pub force: bool,
    pub tag: Option<String>,
    pub backup_id: Option<String>,
    pub pre_restore_backup: bool,
    pub suite: Option<String>,
    pub exec_args: Vec<String>,
    pub tail: Option<usize>,
    pub secret: Option<SecretAction>,
}

pub const DEFAULT_LOG_TAIL: usize = 100;

/// UTC timestamp with millisecond resolution, e.g. `20240501T101500123Z`.
pub fn backup_stamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// Everything a handler may consult. Built fresh for every dispatch.
pub struct HandlerContext {
    pub project_root: PathBuf,
    pub environment: Arc<EnvironmentConfig>,
    pub service_name: String,
    pub service: ServiceConfig,
    pub requirements: ServiceRequirements,
    pub platform: PlatformType,
    pub command: CommandKind,
    pub options: CommandOptions,
    /// Last persisted (or discovered) resource handle.
    pub saved: Option<ServiceState>,
    pub runner: Arc<dyn CommandRunner>,
    pub state: StateManager,
}

impl HandlerContext {
    pub fn env_name(&self) -> &str {
        &self.environment.name
    }

    pub fn header(&self) -> ResultHeader {
        ResultHeader {
            command: self.command,
            service: self.service_name.clone(),
            service_type: self.service.service_type,
            platform: self.platform,
            environment: self.environment.name.clone(),
        }
    }

    pub fn saved_data(&self) -> Option<&ResourceData> {
        self.saved.as_ref().map(|s| &s.resources.data)
    }

    pub fn resources(&self, data: ResourceData) -> PlatformResources {
        PlatformResources::new(self.platform, data)
    }

    /// `semiont-<environment>-<service>`; used for container, log group and
    /// secret names.
    pub fn resource_name(&self) -> String {
        format!("semiont-{}-{}", self.environment.name, self.service_name)
    }

    pub fn working_dir(&self) -> PathBuf {
        match &self.service.working_dir {
            Some(dir) => self.project_root.join(dir),
            None => self.project_root.clone(),
        }
    }

    pub fn data_dir(&self) -> Option<PathBuf> {
        self.service
            .data_dir
            .as_ref()
            .map(|d| self.project_root.join(d))
    }

    pub fn secrets_file(&self) -> PathBuf {
        match &self.service.secrets_file {
            Some(f) => self.project_root.join(f),
            None => self.working_dir().join(".env"),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        paths::log_file(&self.project_root, &self.environment.name, &self.service_name)
    }

    pub fn backups_dir(&self) -> PathBuf {
        paths::backups_dir(&self.project_root, &self.environment.name, &self.service_name)
    }

    pub fn mock_dir(&self) -> PathBuf {
        paths::mock_dir(&self.project_root, &self.environment.name, &self.service_name)
    }

    /// `--name` when given (validated), otherwise a UTC timestamp.
    pub fn new_backup_id(&self) -> Result<String> {
        match &self.options.backup_id {
            Some(id) => {
                paths::validate_backup_id(id)?;
                Ok(id.clone())
            }
            None => Ok(backup_stamp()),
        }
    }

    /// Id for the safety backup taken before a restore.
    pub fn pre_restore_id(&self) -> String {
        format!("pre-restore-{}", backup_stamp())
    }

    pub fn tail(&self) -> usize {
        self.options.tail.unwrap_or(DEFAULT_LOG_TAIL)
    }

    pub fn exec_line(&self) -> String {
        self.options.exec_args.join(" ")
    }

    pub async fn run(&self, cmd: &ShellCommand) -> Result<ShellOutput> {
        self.runner.run(cmd).await
    }

    pub async fn run_checked(&self, cmd: &ShellCommand) -> Result<ShellOutput> {
        run_checked(self.runner.as_ref(), cmd).await
    }
}

// ---------------------------------------------------------------------------
// HandlerOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Keep,
    Save(PlatformResources),
    Clear,
}

#[derive(Debug, Clone)]
pub struct HandlerOutput {
    pub details: ResultDetails,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub state: StateChange,
}

impl HandlerOutput {
    pub fn new(details: ResultDetails) -> Self {
        Self {
            details,
            metadata: serde_json::Map::new(),
            state: StateChange::Keep,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn save(mut self, resources: PlatformResources) -> Self {
        self.state = StateChange::Save(resources);
        self
    }

    pub fn clear(mut self) -> Self {
        self.state = StateChange::Clear;
        self
    }
}
