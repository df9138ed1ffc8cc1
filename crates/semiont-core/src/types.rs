use crate::error::SemiontError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// PlatformType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformType {
    Aws,
    Posix,
    Container,
    External,
    Mock,
}

impl PlatformType {
    pub fn all() -> &'static [PlatformType] {
        &[
            PlatformType::Aws,
            PlatformType::Posix,
            PlatformType::Container,
            PlatformType::External,
            PlatformType::Mock,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlatformType::Aws => "aws",
            PlatformType::Posix => "posix",
            PlatformType::Container => "container",
            PlatformType::External => "external",
            PlatformType::Mock => "mock",
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlatformType {
    type Err = SemiontError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aws" => Ok(PlatformType::Aws),
            "posix" => Ok(PlatformType::Posix),
            "container" => Ok(PlatformType::Container),
            "external" => Ok(PlatformType::External),
            "mock" => Ok(PlatformType::Mock),
            _ => Err(SemiontError::InvalidPlatform(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceType
// ---------------------------------------------------------------------------

/// What a service is, independent of where it runs. `Generic` doubles as the
/// registry wildcard: a handler registered for `Generic` serves every type
/// that has no more specific handler.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Frontend,
    Backend,
    Database,
    Graph,
    Filesystem,
    Mcp,
    Inference,
    #[default]
    Generic,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Frontend => "frontend",
            ServiceType::Backend => "backend",
            ServiceType::Database => "database",
            ServiceType::Graph => "graph",
            ServiceType::Filesystem => "filesystem",
            ServiceType::Mcp => "mcp",
            ServiceType::Inference => "inference",
            ServiceType::Generic => "generic",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceType {
    type Err = SemiontError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frontend" => Ok(ServiceType::Frontend),
            "backend" => Ok(ServiceType::Backend),
            "database" => Ok(ServiceType::Database),
            "graph" => Ok(ServiceType::Graph),
            "filesystem" => Ok(ServiceType::Filesystem),
            "mcp" => Ok(ServiceType::Mcp),
            "inference" => Ok(ServiceType::Inference),
            "generic" => Ok(ServiceType::Generic),
            _ => Err(SemiontError::InvalidServiceType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Start,
    Stop,
    Check,
    Provision,
    Publish,
    Backup,
    Restore,
    Test,
    Exec,
    Update,
    Logs,
    Secret,
}

impl CommandKind {
    pub fn all() -> &'static [CommandKind] {
        &[
            CommandKind::Start,
            CommandKind::Stop,
            CommandKind::Check,
            CommandKind::Provision,
            CommandKind::Publish,
            CommandKind::Backup,
            CommandKind::Restore,
            CommandKind::Test,
            CommandKind::Exec,
            CommandKind::Update,
            CommandKind::Logs,
            CommandKind::Secret,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::Check => "check",
            CommandKind::Provision => "provision",
            CommandKind::Publish => "publish",
            CommandKind::Backup => "backup",
            CommandKind::Restore => "restore",
            CommandKind::Test => "test",
            CommandKind::Exec => "exec",
            CommandKind::Update => "update",
            CommandKind::Logs => "logs",
            CommandKind::Secret => "secret",
        }
    }

    /// Commands that change what is deployed or running.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            CommandKind::Start
                | CommandKind::Stop
                | CommandKind::Provision
                | CommandKind::Publish
                | CommandKind::Restore
                | CommandKind::Update
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandKind {
    type Err = SemiontError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| SemiontError::InvalidCommand(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ServiceStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Running,
    Stopped,
    Degraded,
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
