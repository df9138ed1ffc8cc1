use crate::error::{Result, SemiontError};
use crate::paths;
use crate::types::{CommandKind, PlatformType, ServiceType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ProjectConfig (semiont.yaml)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectInfo,
    #[serde(default = "default_environment")]
    pub default_environment: String,
}

fn default_version() -> u32 {
    1
}

fn default_environment() -> String {
    "local".to_string()
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectInfo {
                name: name.into(),
                description: None,
            },
            default_environment: default_environment(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::project_config_path(root);
        if !path.exists() {
            return Err(SemiontError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::project_config_path(root), data.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// AWS settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_name: Option<String>,
    #[serde(default = "default_ecr_prefix")]
    pub ecr_repository_prefix: String,
}

fn default_ecr_prefix() -> String {
    "semiont".to_string()
}

/// Per-service AWS identifiers. Anything left unset is derived from the
/// environment and service names.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceAwsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
}

fn default_desired_count() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(rename = "type", default)]
    pub service_type: ServiceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
    /// Public endpoint, used by external and cloud health checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<ServiceAwsConfig>,
    /// Commands the mock platform should fail. Ignored elsewhere.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub simulate_failure: Vec<CommandKind>,
}

impl ServiceConfig {
    pub fn new(service_type: ServiceType) -> Self {
        Self {
            service_type,
            ..Self::default()
        }
    }

    pub fn aws(&self) -> ServiceAwsConfig {
        self.aws.clone().unwrap_or_else(|| ServiceAwsConfig {
            desired_count: default_desired_count(),
            ..ServiceAwsConfig::default()
        })
    }
}

// ---------------------------------------------------------------------------
// EnvironmentConfig (environments/<env>.yaml)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_platform: Option<PlatformType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_runtime: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl EnvironmentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load `environments/<env>.{yaml,yml,json}`. The file stem is the
    /// environment name; an explicit `name` must agree with it.
    pub fn load(root: &Path, env: &str) -> Result<Self> {
        paths::validate_name(env)?;
        let path = paths::environment_candidates(root, env)
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| SemiontError::EnvironmentNotFound(env.to_string()))?;

        let data = std::fs::read_to_string(&path)?;
        let mut cfg: EnvironmentConfig = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&data)?
        } else {
            serde_yaml::from_str(&data)?
        };
        if cfg.name.is_empty() {
            cfg.name = env.to_string();
        } else if cfg.name != env {
            // State is keyed by environment name; it must not drift from the file.
            return Err(SemiontError::EnvironmentNameMismatch {
                file: path.display().to_string(),
                name: cfg.name,
            });
        }
        for name in cfg.services.keys() {
            paths::validate_name(name)?;
        }
        tracing::debug!(environment = %cfg.name, path = %path.display(), services = cfg.services.len(), "loaded environment");
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        paths::validate_name(&self.name)?;
        let path = paths::environments_dir(root).join(format!("{}.yaml", self.name));
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Environment names that have a config file under `environments/`.
    pub fn list(root: &Path) -> Result<Vec<String>> {
        let dir = paths::environments_dir(root);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let ext = path.extension()?.to_str()?;
                if matches!(ext, "yaml" | "yml" | "json") {
                    path.file_stem()?.to_str().map(str::to_string)
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn service(&self, name: &str) -> Result<&ServiceConfig> {
        self.services
            .get(name)
            .ok_or_else(|| SemiontError::ServiceNotFound {
                service: name.to_string(),
                environment: self.name.clone(),
            })
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// Explicit override, then the service's own platform, then the
    /// environment default.
    pub fn resolve_platform(
        &self,
        service: &str,
        override_platform: Option<PlatformType>,
    ) -> Result<PlatformType> {
        let cfg = self.service(service)?;
        override_platform
            .or(cfg.platform)
            .or(self.default_platform)
            .ok_or_else(|| SemiontError::NoPlatform(service.to_string()))
    }

    pub fn aws(&self) -> AwsConfig {
        self.aws.clone().unwrap_or_else(|| AwsConfig {
            ecr_repository_prefix: default_ecr_prefix(),
            ..AwsConfig::default()
        })
    }
}
