//! Services run as containers under docker or podman.

use futures::future::BoxFuture;
use futures::FutureExt;
use semiont_core::io::ensure_dir;
use semiont_core::results::ResultDetails;
use semiont_core::state::ResourceData;
use semiont_core::types::{CommandKind, PlatformType, ServiceStatus, ServiceType};
use serde::Deserialize;

use super::posix::{env_file_secret, exec_outcome, require_exec_line, test_outcome, test_script};
use super::{ensure_new_backup, locate_backup, tail_entries};
use crate::context::{HandlerContext, HandlerOutput};
use crate::registry::{HandlerDescriptor, HandlerFn};
use crate::shell::ShellCommand;
use crate::strategy::PlatformStrategy;
use crate::{health, PlatformError, Result};

const RUNTIMES: &[&str] = &["docker", "podman"];
const HELPER_IMAGE: &str = "alpine:3";
const STOP_TIMEOUT_SECS: &str = "10";

pub struct ContainerStrategy;

impl PlatformStrategy for ContainerStrategy {
    fn platform(&self) -> PlatformType {
        PlatformType::Container
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
                HandlerDescriptor::new(PlatformType::Container, ServiceType::Generic, command, handler)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Configured runtime, else the first of docker/podman found on PATH.
fn runtime(ctx: &HandlerContext) -> Result<String> {
    if let Some(rt) = &ctx.environment.container_runtime {
        return Ok(rt.clone());
    }
    RUNTIMES
        .iter()
        .find(|rt| ctx.runner.is_available(rt))
        .map(|rt| rt.to_string())
        .ok_or_else(|| PlatformError::ToolMissing {
            program: RUNTIMES.join(" or "),
        })
}

/// `image` from config (or `semiont-<service>`), tagged with `--tag` unless
/// the configured reference already pins one.
fn image_ref(ctx: &HandlerContext) -> String {
    let base = ctx
        .service
        .image
        .clone()
        .unwrap_or_else(|| format!("semiont-{}", ctx.service_name));
    let last = base.rsplit('/').next().unwrap_or(&base);
    if last.contains(':') || last.contains('@') {
        return base;
    }
    let tag = ctx.options.tag.as_deref().unwrap_or("latest");
    format!("{base}:{tag}")
}

fn volume_name(ctx: &HandlerContext) -> String {
    format!("{}-data", ctx.resource_name())
}

fn has_volume(ctx: &HandlerContext) -> bool {
    ctx.requirements.storage.iter().any(|s| s.persistent)
}

/// Mount point for the data volume inside the service container.
fn volume_target(ctx: &HandlerContext) -> String {
    ctx.requirements
        .storage
        .iter()
        .find(|s| s.persistent)
        .map(|s| s.path.display().to_string())
        .filter(|p| p.starts_with('/'))
        .unwrap_or_else(|| "/data".to_string())
}

/// `docker run -d` for this service. Returns the new container id.
async fn run_container(ctx: &HandlerContext, rt: &str) -> Result<(String, ResourceData)> {
    let name = ctx.resource_name();
    // A stopped container with the same name would block `run --name`.
    ctx.run(&ShellCommand::new(rt).args(["rm", "-f", &name]))
        .await?;

    let image = image_ref(ctx);
    let port = ctx.requirements.primary_port();
    let mut cmd = ShellCommand::new(rt).args(["run", "-d", "--name", &name]);
    if let Some(p) = port {
        cmd = cmd.arg("-p").arg(format!("{p}:{p}"));
    }
    for (k, v) in &ctx.requirements.environment {
        cmd = cmd.arg("-e").arg(format!("{k}={v}"));
    }
    let secrets = ctx.secrets_file();
    if secrets.is_file() {
        cmd = cmd.arg("--env-file").arg(secrets.display().to_string());
    }
    if has_volume(ctx) {
        cmd = cmd
            .arg("-v")
            .arg(format!("{}:{}", volume_name(ctx), volume_target(ctx)));
    }
    if let Some(cpu) = &ctx.requirements.resources.cpu {
        cmd = cmd.arg("--cpus").arg(cpu);
    }
    if let Some(mem) = &ctx.requirements.resources.memory {
        cmd = cmd.arg("--memory").arg(mem);
    }
    cmd = cmd.arg(&image);

    let out = ctx.run_checked(&cmd).await?;
    let container_id = out.stdout.trim().to_string();
    if container_id.is_empty() {
        return Err(PlatformError::UnexpectedOutput {
            what: format!("{rt} run"),
            detail: "no container id".into(),
        });
    }
    tracing::info!(service = %ctx.service_name, container = %name, %image, "container started");
    Ok((
        container_id.clone(),
        ResourceData::Container {
            container_id,
            name,
            image,
            port,
        },
    ))
}

fn container_name(ctx: &HandlerContext) -> String {
    match ctx.saved_data() {
        Some(ResourceData::Container { name, .. }) => name.clone(),
        _ => ctx.resource_name(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    running: bool,
    #[serde(default)]
    health: Option<ContainerHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerHealth {
    status: String,
}

impl ContainerState {
    fn service_status(&self) -> ServiceStatus {
        match (self.running, self.health.as_ref().map(|h| h.status.as_str())) {
            (true, Some("unhealthy")) => ServiceStatus::Degraded,
            (true, _) => ServiceStatus::Running,
            (false, _) if self.status == "restarting" => ServiceStatus::Degraded,
            (false, _) => ServiceStatus::Stopped,
        }
    }
}

/// Run `script` in a throwaway helper container with the data volume at
/// `/data` and the backups directory at `/backup`.
async fn with_volume(ctx: &HandlerContext, rt: &str, read_only: bool, script: &str) -> Result<()> {
    let dir = ctx.backups_dir();
    ensure_dir(&dir)?;
    let data_mount = if read_only {
        format!("{}:/data:ro", volume_name(ctx))
    } else {
        format!("{}:/data", volume_name(ctx))
    };
    ctx.run_checked(&ShellCommand::new(rt).args([
        "run",
        "--rm",
        "-v",
        &data_mount,
        "-v",
        &format!("{}:/backup", dir.display()),
        HELPER_IMAGE,
        "sh",
        "-c",
        script,
    ]))
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn start(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let rt = runtime(ctx)?;
        let (container_id, data) = run_container(ctx, &rt).await?;
        let port = ctx.requirements.primary_port();
        Ok(HandlerOutput::new(ResultDetails::Start {
            endpoint: port.map(|p| format!("http://localhost:{p}")),
            pid: None,
            container_id: Some(container_id),
            port,
            resource_id: None,
        })
        .save(ctx.resources(data)))
    }
    .boxed()
}

fn stop(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let rt = runtime(ctx)?;
        let name = container_name(ctx);
        let (was_running, graceful) = if ctx.options.force {
            let out = ctx
                .run(&ShellCommand::new(&rt).args(["rm", "-f", &name]))
                .await?;
            (out.success(), false)
        } else {
            let out = ctx
                .run(&ShellCommand::new(&rt).args(["stop", "-t", STOP_TIMEOUT_SECS, &name]))
                .await?;
            if out.success() {
                ctx.run(&ShellCommand::new(&rt).args(["rm", &name])).await?;
            } else if !out.stderr.contains("No such container") {
                out.clone().checked(&rt)?;
            }
            (out.success(), true)
        };
        Ok(HandlerOutput::new(ResultDetails::Stop {
            was_running,
            graceful,
        })
        .clear())
    }
    .boxed()
}

fn check(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let rt = runtime(ctx)?;
        let name = container_name(ctx);
        let out = ctx
            .run(&ShellCommand::new(&rt).args(["inspect", "--format", "{{json .State}}", &name]))
            .await?;
        if !out.success() {
            let stopped = HandlerOutput::new(ResultDetails::Check {
                status: ServiceStatus::Stopped,
                health: None,
                resources: None,
            });
            return Ok(if ctx.saved.is_some() { stopped.clear() } else { stopped });
        }

        let state: ContainerState = out.stdout_json(&format!("{rt} inspect"))?;
        let mut status = state.service_status();
        let health = match ctx.requirements.health_check_url("localhost") {
            Some(url) if state.running => Some(health::probe(&url, health::DEFAULT_TIMEOUT).await),
            _ => None,
        };
        if matches!(&health, Some(h) if !h.healthy) && status == ServiceStatus::Running {
            status = ServiceStatus::Degraded;
        }
        Ok(HandlerOutput::new(ResultDetails::Check {
            status,
            health,
            resources: ctx.saved.as_ref().map(|s| s.resources.clone()),
        })
        .with_metadata("container_status", state.status))
    }
    .boxed()
}

fn provision(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let mut created = Vec::new();
        if has_volume(ctx) {
            let rt = runtime(ctx)?;
            let volume = volume_name(ctx);
            let exists = ctx
                .run(&ShellCommand::new(&rt).args(["volume", "inspect", &volume]))
                .await?
                .success();
            if !exists {
                ctx.run_checked(&ShellCommand::new(&rt).args(["volume", "create", &volume]))
                    .await?;
                created.push(volume);
            }
        }
        Ok(HandlerOutput::new(ResultDetails::Provision { created }))
    }
    .boxed()
}

fn publish(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let rt = runtime(ctx)?;
        let dockerfile = ctx.requirements.build.dockerfile.clone().ok_or_else(|| {
            PlatformError::MissingRequirement(format!(
                "`dockerfile` for service '{}'",
                ctx.service_name
            ))
        })?;
        let context = ctx
            .requirements
            .build
            .context
            .clone()
            .unwrap_or_else(|| ".".into());
        let image = image_ref(ctx);
        ctx.run_checked(
            &ShellCommand::new(&rt)
                .args(["build", "-t", &image, "-f"])
                .arg(dockerfile.display().to_string())
                .arg(context.display().to_string())
                .cwd(&ctx.project_root),
        )
        .await?;
        Ok(HandlerOutput::new(ResultDetails::Publish {
            tag: image.rsplit_once(':').map(|(_, t)| t.to_string()),
            artifact: image,
            revision: super::posix::git_revision(ctx).await,
        }))
    }
    .boxed()
}

fn backup(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let rt = runtime(ctx)?;
        if !has_volume(ctx) {
            return Err(PlatformError::MissingRequirement(
                "a persistent volume (`data_dir`) to back up".into(),
            ));
        }
        let id = ctx.new_backup_id()?;
        ensure_new_backup(&ctx.backups_dir(), &id)?;
        with_volume(ctx, &rt, true, &format!("tar -czf /backup/{id}.tar.gz -C /data ."))
            .await?;
        let path = ctx.backups_dir().join(format!("{id}.tar.gz"));
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
        let rt = runtime(ctx)?;
        let (id, path) = locate_backup(&ctx.backups_dir(), ctx.options.backup_id.as_deref())?;
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();

        let pre_restore_backup = if ctx.options.pre_restore_backup {
            let pre = ctx.pre_restore_id();
            with_volume(ctx, &rt, true, &format!("tar -czf /backup/{pre}.tar.gz -C /data ."))
                .await?;
            Some(pre)
        } else {
            None
        };

        with_volume(
            ctx,
            &rt,
            false,
            &format!("find /data -mindepth 1 -delete && tar -xzf /backup/{file} -C /data"),
        )
        .await?;
        Ok(HandlerOutput::new(ResultDetails::Restore {
            backup_id: id,
            pre_restore_backup,
        }))
    }
    .boxed()
}

fn test(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let rt = runtime(ctx)?;
        let script = test_script(ctx)?;
        let mut cmd = ShellCommand::new(&rt).args(["run", "--rm"]);
        for (k, v) in &ctx.requirements.environment {
            cmd = cmd.arg("-e").arg(format!("{k}={v}"));
        }
        let out = ctx
            .run(&cmd.arg(image_ref(ctx)).args(["sh", "-c"]).arg(script))
            .await?;
        test_outcome(ctx, &out)
    }
    .boxed()
}

fn exec(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let rt = runtime(ctx)?;
        let line = require_exec_line(ctx)?;
        let out = ctx
            .run(
                &ShellCommand::new(&rt)
                    .args(["exec", &container_name(ctx), "sh", "-c"])
                    .arg(&line),
            )
            .await?;
        exec_outcome(line, out)
    }
    .boxed()
}

fn update(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let rt = runtime(ctx)?;
        let previous = match ctx.saved_data() {
            Some(ResourceData::Container { container_id, .. }) => {
                Some(container_id.chars().take(12).collect())
            }
            _ => None,
        };
        let (container_id, data) = run_container(ctx, &rt).await?;
        Ok(HandlerOutput::new(ResultDetails::Update {
            previous,
            current: Some(container_id.chars().take(12).collect()),
        })
        .save(ctx.resources(data)))
    }
    .boxed()
}

fn logs(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let rt = runtime(ctx)?;
        let n = ctx.tail();
        let out = ctx
            .run_checked(&ShellCommand::new(&rt).args([
                "logs",
                "--tail",
                &n.to_string(),
                "--timestamps",
                &container_name(ctx),
            ]))
            .await?;
        // Container stderr arrives on our stderr.
        let mut entries = tail_entries("stdout", &out.stdout, n);
        entries.extend(tail_entries("stderr", &out.stderr, n));
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let start = entries.len().saturating_sub(n);
        Ok(HandlerOutput::new(ResultDetails::Logs {
            entries: entries.split_off(start),
        }))
    }
    .boxed()
}

fn secret(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move { env_file_secret(ctx) }.boxed()
}
