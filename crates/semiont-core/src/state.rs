//! Last-known resource handles, one JSON record per (environment, service).
//!
//! Layout:
//!   .semiont/state/
//!     local/
//!       backend.json
//!       frontend.json
//!     production/
//!       backend.json
//!
//! Records are written by `start`/`provision`, read by `check`/`stop`/`update`,
//! and cleared when a service is stopped. There is no locking: concurrent
//! invocations against one service are last-writer-wins.

use crate::error::Result;
use crate::paths;
use crate::types::PlatformType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Resource handles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceData {
    Process {
        pid: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        command: String,
        log_path: PathBuf,
    },
    Container {
        container_id: String,
        name: String,
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    Ecs {
        cluster: String,
        service_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_arn: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_definition_arn: Option<String>,
        region: String,
    },
    Rds {
        instance_identifier: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    Neptune {
        cluster_identifier: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    Efs {
        file_system_id: String,
    },
    External {
        endpoint: String,
    },
    Mock {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
}

impl ResourceData {
    /// Short human-readable identifier for tables.
    pub fn identifier(&self) -> String {
        match self {
            ResourceData::Process { pid, .. } => format!("pid {pid}"),
            ResourceData::Container { name, .. } => name.clone(),
            ResourceData::Ecs {
                cluster,
                service_name,
                ..
            } => format!("{cluster}/{service_name}"),
            ResourceData::Rds {
                instance_identifier,
                ..
            } => instance_identifier.clone(),
            ResourceData::Neptune {
                cluster_identifier, ..
            } => cluster_identifier.clone(),
            ResourceData::Efs { file_system_id } => file_system_id.clone(),
            ResourceData::External { endpoint } => endpoint.clone(),
            ResourceData::Mock { id, .. } => format!("mock {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformResources {
    pub platform: PlatformType,
    pub data: ResourceData,
}

impl PlatformResources {
    pub fn new(platform: PlatformType, data: ResourceData) -> Self {
        Self { platform, data }
    }
}

// ---------------------------------------------------------------------------
// ServiceState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    pub platform: PlatformType,
    pub environment: String,
    pub service_name: String,
    pub resources: PlatformResources,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceState {
    pub fn new(
        environment: impl Into<String>,
        service_name: impl Into<String>,
        resources: PlatformResources,
    ) -> Self {
        let now = Utc::now();
        Self {
            platform: resources.platform,
            environment: environment.into(),
            service_name: service_name.into(),
            resources,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// StateManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StateManager {
    root: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            root: project_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, environment: &str, service: &str) -> Result<PathBuf> {
        paths::validate_name(environment)?;
        paths::validate_name(service)?;
        Ok(paths::state_file(&self.root, environment, service))
    }

    pub fn load(&self, environment: &str, service: &str) -> Result<Option<ServiceState>> {
        let path = self.path_for(environment, service)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Persist `state`, keeping the original `created_at` of an existing record.
    pub fn save(&self, state: &ServiceState) -> Result<()> {
        let path = self.path_for(&state.environment, &state.service_name)?;
        let mut record = state.clone();
        if let Ok(Some(existing)) = self.load(&state.environment, &state.service_name) {
            record.created_at = existing.created_at;
        }
        record.updated_at = Utc::now();
        let data = serde_json::to_string_pretty(&record)?;
        crate::io::atomic_write(&path, data.as_bytes())?;
        tracing::debug!(environment = %state.environment, service = %state.service_name, "saved service state");
        Ok(())
    }

    /// Remove a record. Returns true if one existed.
    pub fn clear(&self, environment: &str, service: &str) -> Result<bool> {
        let path = self.path_for(environment, service)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        tracing::debug!(environment, service, "cleared service state");
        Ok(true)
    }

    pub fn list(&self, environment: &str) -> Result<Vec<ServiceState>> {
        paths::validate_name(environment)?;
        let dir = paths::state_dir(&self.root, environment);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut states = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(crate::SemiontError::from)
                .and_then(|data| {
                    serde_json::from_str::<ServiceState>(&data).map_err(Into::into)
                });
            match parsed {
                Ok(state) => states.push(state),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable state record")
                }
            }
        }
        states.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        Ok(states)
    }
}
