use crate::state::PlatformResources;
use crate::types::{CommandKind, PlatformType, ServiceStatus, ServiceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub source: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// ResultDetails
// ---------------------------------------------------------------------------

/// Command-specific payload of a successful (or partially successful) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultDetails {
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
    },
    Stop {
        was_running: bool,
        graceful: bool,
    },
    Check {
        status: ServiceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        health: Option<HealthReport>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resources: Option<PlatformResources>,
    },
    Provision {
        created: Vec<String>,
    },
    Publish {
        artifact: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
    },
    Backup {
        backup_id: String,
        location: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
    },
    Restore {
        backup_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pre_restore_backup: Option<String>,
    },
    Test {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suite: Option<String>,
        passed: u32,
        failed: u32,
        skipped: u32,
        exit_code: i32,
    },
    Exec {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<String>,
    },
    Logs {
        entries: Vec<LogEntry>,
    },
    Secret {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        keys: Vec<String>,
    },
}

impl ResultDetails {
    /// One-line summary for table output.
    pub fn summary(&self) -> String {
        match self {
            ResultDetails::Start {
                endpoint,
                pid,
                container_id,
                resource_id,
                ..
            } => endpoint
                .clone()
                .or_else(|| pid.map(|p| format!("pid {p}")))
                .or_else(|| container_id.as_ref().map(|c| c.chars().take(12).collect()))
                .or_else(|| resource_id.clone())
                .unwrap_or_else(|| "started".to_string()),
            ResultDetails::Stop { was_running, .. } => {
                if *was_running {
                    "stopped".to_string()
                } else {
                    "not running".to_string()
                }
            }
            ResultDetails::Check { status, health, .. } => match health {
                Some(h) if h.healthy => format!("{status} (healthy)"),
                Some(h) => format!(
                    "{status} (unhealthy: {})",
                    h.message.as_deref().unwrap_or("no response")
                ),
                None => status.to_string(),
            },
            ResultDetails::Provision { created } => {
                if created.is_empty() {
                    "nothing to create".to_string()
                } else {
                    format!("created {}", created.join(", "))
                }
            }
            ResultDetails::Publish { artifact, .. } => artifact.clone(),
            ResultDetails::Backup { backup_id, .. } => format!("backup {backup_id}"),
            ResultDetails::Restore { backup_id, .. } => format!("restored {backup_id}"),
            ResultDetails::Test {
                passed,
                failed,
                skipped,
                ..
            } => format!("{passed} passed, {failed} failed, {skipped} skipped"),
            ResultDetails::Exec { exit_code, .. } => format!("exit {exit_code}"),
            ResultDetails::Update { previous, current } => format!(
                "{} -> {}",
                previous.as_deref().unwrap_or("-"),
                current.as_deref().unwrap_or("-")
            ),
            ResultDetails::Logs { entries } => format!("{} lines", entries.len()),
            ResultDetails::Secret { action, key, .. } => match key {
                Some(k) => format!("{action} {k}"),
                None => action.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// CommandResult
// ---------------------------------------------------------------------------

/// Outcome of one command against one service.
///
/// `success == true` implies `error.is_none()`, and a failure always carries
/// an error message. Construct through [`CommandResult::succeeded`] or
/// [`CommandResult::failed`] to keep that true.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command: CommandKind,
    pub service: String,
    pub service_type: ServiceType,
    pub platform: PlatformType,
    pub environment: String,
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ResultDetails>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Identity of the (service, platform, command) a result belongs to.
#[derive(Debug, Clone)]
pub struct ResultHeader {
    pub command: CommandKind,
    pub service: String,
    pub service_type: ServiceType,
    pub platform: PlatformType,
    pub environment: String,
}

impl CommandResult {
    pub fn succeeded(
        header: ResultHeader,
        details: Option<ResultDetails>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self::build(header, true, None, details, metadata)
    }

    pub fn failed(header: ResultHeader, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "unknown error".to_string();
        }
        Self::build(header, false, Some(error), None, serde_json::Map::new())
    }

    fn build(
        header: ResultHeader,
        success: bool,
        error: Option<String>,
        details: Option<ResultDetails>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            command: header.command,
            service: header.service,
            service_type: header.service_type,
            platform: header.platform,
            environment: header.environment,
            success,
            error,
            timestamp: Utc::now(),
            duration_ms: 0,
            details,
            metadata,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Table text: the error for failures, the details summary otherwise.
    pub fn summary(&self) -> String {
        match (&self.error, &self.details) {
            (Some(e), _) => e.lines().next().unwrap_or_default().to_string(),
            (None, Some(d)) => d.summary(),
            (None, None) => {
                if self.metadata.get("dry_run").and_then(|v| v.as_bool()) == Some(true) {
                    "dry run".to_string()
                } else {
                    "ok".to_string()
                }
            }
        }
    }
}

/// (succeeded, failed) counts.
pub fn summarize(results: &[CommandResult]) -> (usize, usize) {
    let ok = results.iter().filter(|r| r.success()).count();
    (ok, results.len() - ok)
}
