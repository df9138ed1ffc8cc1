use semiont_core::types::{CommandKind, PlatformType, ServiceType};
use semiont_core::SemiontError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error(transparent)]
    Core(#[from] SemiontError),

    #[error("no handler for {platform}/{service_type}/{command}")]
    NoHandler {
        platform: PlatformType,
        service_type: ServiceType,
        command: CommandKind,
    },

    #[error("platform '{0}' is not registered")]
    UnknownPlatform(PlatformType),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("'{program}' not found on PATH")]
    ToolMissing { program: String },

    #[error("service is missing required configuration: {0}")]
    MissingRequirement(String),

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected output from {what}: {detail}")]
    UnexpectedOutput { what: String, detail: String },

    #[error("{0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlatformError>;
