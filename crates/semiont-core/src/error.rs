use thiserror::Error;

#[derive(Debug, Error)]
pub enum SemiontError {
    #[error("not initialized: run 'semiont init'")]
    NotInitialized,

    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("service '{service}' is not defined in environment '{environment}'")]
    ServiceNotFound {
        service: String,
        environment: String,
    },

    #[error("no platform configured for service '{0}': set `platform` on the service or `default_platform` on the environment")]
    NoPlatform(String),

    #[error("invalid name '{0}': must be lowercase alphanumeric with hyphens or underscores")]
    InvalidName(String),

    #[error("invalid backup id '{0}': use letters, digits, '.', '-' or '_'")]
    InvalidBackupId(String),

    #[error("environment file '{file}' declares name '{name}'; the name must match the file")]
    EnvironmentNameMismatch { file: String, name: String },

    #[error("invalid platform: {0}")]
    InvalidPlatform(String),

    #[error("invalid service type: {0}")]
    InvalidServiceType(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid .env line {line}: {content}")]
    InvalidEnvLine { line: usize, content: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SemiontError>;
