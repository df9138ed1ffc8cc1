//! Declarative service requirements.
//!
//! Handlers never read raw [`ServiceConfig`] fields to decide what a service
//! needs; they consume the normalized view built here.

use crate::config::ServiceConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkRequirements {
    pub ports: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildRequirements {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageRequirement {
    pub path: PathBuf,
    pub persistent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceRequirements {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceRequirements {
    pub network: NetworkRequirements,
    pub build: BuildRequirements,
    pub storage: Vec<StorageRequirement>,
    pub resources: ResourceRequirements,
    pub environment: BTreeMap<String, String>,
}

impl ServiceRequirements {
    pub fn from_config(service: &str, cfg: &ServiceConfig) -> Self {
        let network = NetworkRequirements {
            ports: cfg.port.into_iter().collect(),
            health_check_path: cfg.health_check_path.clone(),
        };

        // A Dockerfile's directory is its build context unless the service
        // has a working dir of its own.
        let context = cfg.working_dir.clone().or_else(|| {
            cfg.dockerfile
                .as_ref()
                .and_then(|d| d.parent().map(|p| p.to_path_buf()))
        });
        let build = BuildRequirements {
            dockerfile: cfg.dockerfile.clone(),
            context,
            build_command: cfg.build_command.clone(),
        };

        let storage = cfg
            .data_dir
            .iter()
            .map(|p| StorageRequirement {
                path: p.clone(),
                persistent: true,
            })
            .collect();

        let mut environment = cfg.env.clone();
        if let Some(port) = cfg.port {
            environment
                .entry("PORT".to_string())
                .or_insert_with(|| port.to_string());
        }
        environment
            .entry("SEMIONT_SERVICE".to_string())
            .or_insert_with(|| service.to_string());

        Self {
            network,
            build,
            storage,
            resources: ResourceRequirements {
                cpu: cfg.cpu.clone(),
                memory: cfg.memory.clone(),
            },
            environment,
        }
    }

    pub fn primary_port(&self) -> Option<u16> {
        self.network.ports.first().copied()
    }

    pub fn needs_build(&self) -> bool {
        self.build.dockerfile.is_some() || self.build.build_command.is_some()
    }

    /// `http://<host>:<port><path>`, only when both a port and a health
    /// check path are declared.
    pub fn health_check_url(&self, host: &str) -> Option<String> {
        let port = self.primary_port()?;
        let path = self.network.health_check_path.as_deref()?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Some(format!("http://{host}:{port}{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceType;

    #[test]
    fn derives_network_and_env() {
        let mut cfg = ServiceConfig::new(ServiceType::Backend);
        cfg.port = Some(4000);
        cfg.health_check_path = Some("api/health".into());
        cfg.env.insert("NODE_ENV".into(), "production".into());

        let req = ServiceRequirements::from_config("backend", &cfg);
        assert_eq!(req.primary_port(), Some(4000));
        assert_eq!(
            req.health_check_url("localhost").as_deref(),
            Some("http://localhost:4000/api/health")
        );
        assert_eq!(req.environment.get("PORT").map(String::as_str), Some("4000"));
        assert_eq!(
            req.environment.get("SEMIONT_SERVICE").map(String::as_str),
            Some("backend")
        );
        assert_eq!(
            req.environment.get("NODE_ENV").map(String::as_str),
            Some("production")
        );
    }

    #[test]
    fn explicit_port_env_is_kept() {
        let mut cfg = ServiceConfig::new(ServiceType::Frontend);
        cfg.port = Some(3000);
        cfg.env.insert("PORT".into(), "8080".into());
        let req = ServiceRequirements::from_config("frontend", &cfg);
        assert_eq!(req.environment.get("PORT").map(String::as_str), Some("8080"));
    }

    #[test]
    fn no_health_url_without_path() {
        let mut cfg = ServiceConfig::new(ServiceType::Backend);
        cfg.port = Some(4000);
        let req = ServiceRequirements::from_config("backend", &cfg);
        assert!(req.health_check_url("localhost").is_none());
        assert!(!req.needs_build());
    }

    #[test]
    fn build_context_defaults_to_dockerfile_dir() {
        let mut cfg = ServiceConfig::new(ServiceType::Backend);
        cfg.dockerfile = Some("apps/backend/Dockerfile".into());
        cfg.data_dir = Some("data/backend".into());
        let req = ServiceRequirements::from_config("backend", &cfg);
        assert!(req.needs_build());
        assert_eq!(req.build.context, Some(PathBuf::from("apps/backend")));
        assert_eq!(req.storage.len(), 1);
        assert!(req.storage[0].persistent);
    }
}
