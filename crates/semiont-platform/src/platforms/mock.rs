//! In-process stand-in for a real platform, used by tests and dry
//! rehearsals of a deployment.
//!
//! Nothing is executed. Running services are represented by their saved
//! state; backups and secrets are small JSON files under
//! `.semiont/mock/<env>/<service>/` so they survive between invocations.
//! Any command listed in the service's `simulate_failure` fails.

use std::collections::BTreeMap;
use std::path::PathBuf;

use futures::future::BoxFuture;
use futures::FutureExt;
use semiont_core::io::{atomic_write, ensure_dir};
use semiont_core::results::{LogEntry, ResultDetails};
use semiont_core::state::ResourceData;
use semiont_core::types::{CommandKind, PlatformType, ServiceStatus, ServiceType};
use serde_json::json;

use super::{ensure_new_backup, locate_backup};
use crate::context::{HandlerContext, HandlerOutput, SecretAction};
use crate::registry::{HandlerDescriptor, HandlerFn};
use crate::strategy::PlatformStrategy;
use crate::{PlatformError, Result};

pub struct MockStrategy;

impl PlatformStrategy for MockStrategy {
    fn platform(&self) -> PlatformType {
        PlatformType::Mock
    }

    fn handlers(&self) -> Vec<HandlerDescriptor> {
        let table: [(CommandKind, HandlerFn); 12] = [
            (CommandKind::Start, start),
            (CommandKind::Stop, stop),
            (CommandKind::Check, check),
            (CommandKind::Provision, provision),
            (CommandKind::Publish, publish),
            (CommandKind::Backup, backup),
            (CommandKind::Restore, restore),
            (CommandKind::Test, test),
            (CommandKind::Exec, exec),
            (CommandKind::Update, update),
            (CommandKind::Logs, logs),
            (CommandKind::Secret, secret),
        ];
        table
            .into_iter()
            .map(|(command, handler)| {
                HandlerDescriptor::new(PlatformType::Mock, ServiceType::Generic, command, handler)
            })
            .collect()
    }
}

fn simulate(ctx: &HandlerContext) -> Result<()> {
    if ctx.service.simulate_failure.contains(&ctx.command) {
        return Err(PlatformError::Rejected(format!(
            "simulated failure: {}",
            ctx.command
        )));
    }
    Ok(())
}

fn running_id(ctx: &HandlerContext) -> Option<&str> {
    match ctx.saved_data() {
        Some(ResourceData::Mock { id, .. }) => Some(id.as_str()),
        _ => None,
    }
}

fn new_instance(ctx: &HandlerContext) -> (String, ResourceData) {
    let id = uuid::Uuid::new_v4().to_string();
    let data = ResourceData::Mock {
        id: id.clone(),
        port: ctx.requirements.primary_port(),
    };
    (id, data)
}

fn backups_dir(ctx: &HandlerContext) -> PathBuf {
    ctx.mock_dir().join("backups")
}

fn secrets_path(ctx: &HandlerContext) -> PathBuf {
    ctx.mock_dir().join("secrets.json")
}

fn write_backup(ctx: &HandlerContext, id: &str) -> Result<PathBuf> {
    let dir = backups_dir(ctx);
    ensure_dir(&dir)?;
    let path = dir.join(format!("{id}.json"));
    let record = json!({
        "service": ctx.service_name,
        "environment": ctx.env_name(),
        "created_at": chrono::Utc::now().to_rfc3339(),
    });
    atomic_write(&path, record.to_string().as_bytes())?;
    Ok(path)
}

fn start(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        let port = ctx.requirements.primary_port();
        if let Some(id) = running_id(ctx) {
            return Ok(HandlerOutput::new(ResultDetails::Start {
                endpoint: port.map(|p| format!("http://localhost:{p}")),
                pid: None,
                container_id: None,
                port,
                resource_id: Some(id.to_string()),
            })
            .with_metadata("already_running", true));
        }
        let (id, data) = new_instance(ctx);
        Ok(HandlerOutput::new(ResultDetails::Start {
            endpoint: port.map(|p| format!("http://localhost:{p}")),
            pid: None,
            container_id: None,
            port,
            resource_id: Some(id),
        })
        .save(ctx.resources(data)))
    }
    .boxed()
}

fn stop(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        Ok(HandlerOutput::new(ResultDetails::Stop {
            was_running: running_id(ctx).is_some(),
            graceful: !ctx.options.force,
        })
        .clear())
    }
    .boxed()
}

fn check(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        let status = if running_id(ctx).is_some() {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        };
        Ok(HandlerOutput::new(ResultDetails::Check {
            status,
            health: None,
            resources: ctx.saved.as_ref().map(|s| s.resources.clone()),
        }))
    }
    .boxed()
}

fn provision(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        let dir = ctx.mock_dir();
        let mut created = Vec::new();
        if !dir.exists() {
            ensure_dir(&dir)?;
            created.push(dir.display().to_string());
        }
        Ok(HandlerOutput::new(ResultDetails::Provision { created }))
    }
    .boxed()
}

fn publish(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        let tag = ctx.options.tag.clone().unwrap_or_else(|| "latest".into());
        Ok(HandlerOutput::new(ResultDetails::Publish {
            artifact: format!("mock://{}:{tag}", ctx.service_name),
            tag: Some(tag),
            revision: None,
        }))
    }
    .boxed()
}

fn backup(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        let id = ctx.new_backup_id()?;
        ensure_new_backup(&backups_dir(ctx), &id)?;
        let path = write_backup(ctx, &id)?;
        Ok(HandlerOutput::new(ResultDetails::Backup {
            backup_id: id,
            size_bytes: std::fs::metadata(&path).ok().map(|m| m.len()),
            location: path.display().to_string(),
        }))
    }
    .boxed()
}

fn restore(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        let (id, _) = locate_backup(&backups_dir(ctx), ctx.options.backup_id.as_deref())?;
        let pre_restore_backup = if ctx.options.pre_restore_backup {
            let pre = ctx.pre_restore_id();
            write_backup(ctx, &pre)?;
            Some(pre)
        } else {
            None
        };
        Ok(HandlerOutput::new(ResultDetails::Restore {
            backup_id: id,
            pre_restore_backup,
        }))
    }
    .boxed()
}

fn test(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        Ok(HandlerOutput::new(ResultDetails::Test {
            suite: ctx.options.suite.clone(),
            passed: 1,
            failed: 0,
            skipped: 0,
            exit_code: 0,
        }))
    }
    .boxed()
}

fn exec(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        let line = super::posix::require_exec_line(ctx)?;
        Ok(HandlerOutput::new(ResultDetails::Exec {
            stdout: format!("{line}\n"),
            command: line,
            exit_code: 0,
            stderr: String::new(),
        }))
    }
    .boxed()
}

fn update(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        let previous = running_id(ctx).map(str::to_string);
        let (id, data) = new_instance(ctx);
        Ok(HandlerOutput::new(ResultDetails::Update {
            previous,
            current: Some(id),
        })
        .save(ctx.resources(data)))
    }
    .boxed()
}

fn logs(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        let message = match running_id(ctx) {
            Some(id) => format!("{} running as {id}", ctx.service_name),
            None => format!("{} is not running", ctx.service_name),
        };
        let mut entries = vec![LogEntry {
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            source: "mock".into(),
            message,
        }];
        entries.truncate(ctx.tail());
        Ok(HandlerOutput::new(ResultDetails::Logs { entries }))
    }
    .boxed()
}

fn secret(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        simulate(ctx)?;
        let action = ctx
            .options
            .secret
            .clone()
            .ok_or_else(|| PlatformError::MissingRequirement("a secret action".into()))?;
        let path = secrets_path(ctx);
        let mut map: BTreeMap<String, String> = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data).map_err(|source| PlatformError::Parse {
                what: path.display().to_string(),
                source,
            })?
        } else {
            BTreeMap::new()
        };

        let save = |map: &BTreeMap<String, String>| -> Result<()> {
            let data = serde_json::to_string_pretty(map).map_err(|source| PlatformError::Parse {
                what: path.display().to_string(),
                source,
            })?;
            atomic_write(&path, data.as_bytes())?;
            Ok(())
        };

        let (value, keys) = match &action {
            SecretAction::Get { key } => {
                let v = map
                    .get(key)
                    .ok_or_else(|| PlatformError::Rejected(format!("secret '{key}' not found")))?;
                (Some(v.clone()), Vec::new())
            }
            SecretAction::Set { key, value } => {
                map.insert(key.clone(), value.clone());
                save(&map)?;
                (None, Vec::new())
            }
            SecretAction::Delete { key } => {
                if map.remove(key).is_none() {
                    return Err(PlatformError::Rejected(format!("secret '{key}' not found")));
                }
                save(&map)?;
                (None, Vec::new())
            }
            SecretAction::List => (None, map.keys().cloned().collect()),
        };

        Ok(HandlerOutput::new(ResultDetails::Secret {
            action: action.name().to_string(),
            key: action.key().map(str::to_string),
            value,
            keys,
        }))
    }
    .boxed()
}
