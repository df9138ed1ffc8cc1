//! Services run as local processes on this machine.
//!
//! A started service is detached into its own process group with output
//! appended to `.semiont/logs/<env>/<service>.log`; the pid is what gets
//! persisted. Signals go to the whole group so shell wrappers (`npm run`,
//! `sh -c`) take their children down with them.

use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use semiont_core::envfile::EnvFile;
use semiont_core::io::{ensure_dir, tail_lines};
use semiont_core::results::{LogEntry, ResultDetails};
use semiont_core::state::ResourceData;
use semiont_core::types::{CommandKind, PlatformType, ServiceStatus, ServiceType};

use super::{ensure_new_backup, locate_backup, log_entry, tail_entries};
use crate::context::{HandlerContext, HandlerOutput, SecretAction};
use crate::registry::{HandlerDescriptor, HandlerFn};
use crate::shell::{ShellCommand, ShellOutput};
use crate::strategy::PlatformStrategy;
use crate::test_summary;
use crate::{health, PlatformError, Result};

const STOP_POLL: Duration = Duration::from_millis(200);
const STOP_POLLS: u32 = 50;

pub struct PosixStrategy;

impl PlatformStrategy for PosixStrategy {
    fn platform(&self) -> PlatformType {
        PlatformType::Posix
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
                HandlerDescriptor::new(PlatformType::Posix, ServiceType::Generic, command, handler)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Process helpers
// ---------------------------------------------------------------------------

async fn pid_alive(ctx: &HandlerContext, pid: u32) -> Result<bool> {
    let out = ctx
        .run(&ShellCommand::new("kill").args(["-0", &pid.to_string()]))
        .await?;
    Ok(out.success())
}

async fn signal_group(ctx: &HandlerContext, pid: u32, signal: &str) -> Result<()> {
    let out = ctx
        .run(&ShellCommand::new("kill").args([signal, "--", &format!("-{pid}")]))
        .await?;
    if !out.success() {
        // Group already gone or never formed; fall back to the pid itself.
        ctx.run(&ShellCommand::new("kill").args([signal, &pid.to_string()]))
            .await?;
    }
    Ok(())
}

/// Pid listening on `port`, when `lsof` is around to tell us.
async fn port_holder(ctx: &HandlerContext, port: u16) -> Result<Option<u32>> {
    if !ctx.runner.is_available("lsof") {
        return Ok(None);
    }
    let out = ctx
        .run(&ShellCommand::new("lsof").args(["-ti", &format!("tcp:{port}")]))
        .await?;
    if !out.success() {
        return Ok(None);
    }
    Ok(out
        .stdout
        .lines()
        .next()
        .and_then(|l| l.trim().parse().ok()))
}

fn running_pid(ctx: &HandlerContext) -> Option<u32> {
    match ctx.saved_data() {
        Some(ResourceData::Process { pid, .. }) => Some(*pid),
        _ => None,
    }
}

/// Spawn the configured command. Returns the pid and the resource handle.
async fn spawn_service(ctx: &HandlerContext) -> Result<(u32, ResourceData)> {
    let command = ctx.service.command.clone().ok_or_else(|| {
        PlatformError::MissingRequirement(format!("`command` for service '{}'", ctx.service_name))
    })?;
    let port = ctx.requirements.primary_port();
    if let Some(port) = port {
        if let Some(holder) = port_holder(ctx, port).await? {
            return Err(PlatformError::Rejected(format!(
                "port {port} is already in use by pid {holder}"
            )));
        }
    }

    let log_path = ctx.log_path();
    let cmd = ShellCommand::shell(&command)
        .cwd(ctx.working_dir())
        .envs(&ctx.requirements.environment);
    let pid = ctx.runner.spawn_detached(&cmd, &log_path)?;
    tracing::info!(service = %ctx.service_name, pid, log = %log_path.display(), "process started");

    Ok((
        pid,
        ResourceData::Process {
            pid,
            port,
            command,
            log_path,
        },
    ))
}

/// Stop `pid`: TERM, wait, then KILL. Returns whether the exit was graceful.
async fn terminate(ctx: &HandlerContext, pid: u32) -> Result<bool> {
    if ctx.options.force {
        signal_group(ctx, pid, "-KILL").await?;
        return Ok(false);
    }
    signal_group(ctx, pid, "-TERM").await?;
    for _ in 0..STOP_POLLS {
        tokio::time::sleep(STOP_POLL).await;
        if !pid_alive(ctx, pid).await? {
            return Ok(true);
        }
    }
    tracing::warn!(service = %ctx.service_name, pid, "process ignored SIGTERM, sending SIGKILL");
    signal_group(ctx, pid, "-KILL").await?;
    Ok(false)
}

fn endpoint(port: Option<u16>) -> Option<String> {
    port.map(|p| format!("http://localhost:{p}"))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

fn start(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        if let Some(ResourceData::Process { pid, port, .. }) = ctx.saved_data() {
            if pid_alive(ctx, *pid).await? {
                return Ok(HandlerOutput::new(ResultDetails::Start {
                    endpoint: endpoint(*port),
                    pid: Some(*pid),
                    container_id: None,
                    port: *port,
                    resource_id: None,
                })
                .with_metadata("already_running", true));
            }
        }

        let (pid, data) = spawn_service(ctx).await?;
        let port = ctx.requirements.primary_port();
        Ok(HandlerOutput::new(ResultDetails::Start {
            endpoint: endpoint(port),
            pid: Some(pid),
            container_id: None,
            port,
            resource_id: None,
        })
        .save(ctx.resources(data)))
    }
    .boxed()
}

fn stop(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let not_running = HandlerOutput::new(ResultDetails::Stop {
            was_running: false,
            graceful: true,
        })
        .clear();
        let Some(pid) = running_pid(ctx) else {
            return Ok(not_running);
        };
        if !pid_alive(ctx, pid).await? {
            return Ok(not_running.with_metadata("stale_pid", pid));
        }
        let graceful = terminate(ctx, pid).await?;
        Ok(HandlerOutput::new(ResultDetails::Stop {
            was_running: true,
            graceful,
        })
        .clear())
    }
    .boxed()
}

fn check(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let stopped = HandlerOutput::new(ResultDetails::Check {
            status: ServiceStatus::Stopped,
            health: None,
            resources: None,
        });
        let Some(pid) = running_pid(ctx) else {
            return Ok(stopped);
        };
        if !pid_alive(ctx, pid).await? {
            return Ok(stopped.with_metadata("stale_pid", pid).clear());
        }

        let health = match ctx.requirements.health_check_url("localhost") {
            Some(url) => Some(health::probe(&url, health::DEFAULT_TIMEOUT).await),
            None => None,
        };
        let status = match &health {
            Some(h) if !h.healthy => ServiceStatus::Degraded,
            _ => ServiceStatus::Running,
        };
        Ok(HandlerOutput::new(ResultDetails::Check {
            status,
            health,
            resources: ctx.saved.as_ref().map(|s| s.resources.clone()),
        }))
    }
    .boxed()
}

fn provision(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let mut wanted: Vec<PathBuf> = Vec::new();
        if let Some(data) = ctx.data_dir() {
            wanted.push(data);
        }
        if let Some(parent) = ctx.log_path().parent() {
            wanted.push(parent.to_path_buf());
        }
        wanted.push(ctx.backups_dir());

        let mut created = Vec::new();
        for dir in wanted {
            if !dir.exists() {
                ensure_dir(&dir)?;
                created.push(dir.display().to_string());
            }
        }
        Ok(HandlerOutput::new(ResultDetails::Provision { created }))
    }
    .boxed()
}

/// Short commit hash of the project, when it is a git checkout.
pub(crate) async fn git_revision(ctx: &HandlerContext) -> Option<String> {
    let out = ctx
        .run(
            &ShellCommand::new("git")
                .args(["rev-parse", "--short", "HEAD"])
                .cwd(&ctx.project_root),
        )
        .await
        .ok()?;
    let rev = out.stdout.trim();
    (out.success() && !rev.is_empty()).then(|| rev.to_string())
}

fn publish(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let build = ctx.requirements.build.build_command.clone().ok_or_else(|| {
            PlatformError::MissingRequirement(format!(
                "`build_command` for service '{}'",
                ctx.service_name
            ))
        })?;
        ctx.run_checked(
            &ShellCommand::shell(&build)
                .cwd(ctx.working_dir())
                .envs(&ctx.requirements.environment),
        )
        .await?;
        Ok(HandlerOutput::new(ResultDetails::Publish {
            artifact: ctx.working_dir().display().to_string(),
            tag: ctx.options.tag.clone(),
            revision: git_revision(ctx).await,
        }))
    }
    .boxed()
}

// ---------------------------------------------------------------------------
// Backup / restore
// ---------------------------------------------------------------------------

/// Write a backup named `id`. Returns its path.
async fn create_backup(ctx: &HandlerContext, id: &str) -> Result<PathBuf> {
    let dir = ctx.backups_dir();
    ensure_new_backup(&dir, id)?;
    ensure_dir(&dir)?;

    if let Some(url) = &ctx.service.database_url {
        let path = dir.join(format!("{id}.dump"));
        ctx.run_checked(&ShellCommand::new("pg_dump").args([
            "--format=custom",
            "--file",
            &path.display().to_string(),
            url,
        ]))
        .await?;
        return Ok(path);
    }

    let data = ctx.data_dir().ok_or_else(|| {
        PlatformError::MissingRequirement("`data_dir` or `database_url` to back up".into())
    })?;
    if !data.is_dir() {
        return Err(PlatformError::Rejected(format!(
            "data directory {} does not exist",
            data.display()
        )));
    }
    let path = dir.join(format!("{id}.tar.gz"));
    ctx.run_checked(&ShellCommand::new("tar").args([
        "-czf",
        &path.display().to_string(),
        "-C",
        &data.display().to_string(),
        ".",
    ]))
    .await?;
    Ok(path)
}

fn backup(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let id = ctx.new_backup_id()?;
        let path = create_backup(ctx, &id).await?;
        let size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
        Ok(HandlerOutput::new(ResultDetails::Backup {
            backup_id: id,
            location: path.display().to_string(),
            size_bytes,
        }))
    }
    .boxed()
}

fn restore(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let (id, path) = locate_backup(&ctx.backups_dir(), ctx.options.backup_id.as_deref())?;

        let pre_restore_backup = if ctx.options.pre_restore_backup {
            let pre_id = ctx.pre_restore_id();
            create_backup(ctx, &pre_id).await?;
            Some(pre_id)
        } else {
            None
        };

        let file = path.display().to_string();
        if file.ends_with(".dump") {
            let url = ctx.service.database_url.as_deref().ok_or_else(|| {
                PlatformError::MissingRequirement("`database_url` to restore a dump".into())
            })?;
            ctx.run_checked(&ShellCommand::new("pg_restore").args([
                "--clean",
                "--if-exists",
                "--dbname",
                url,
                &file,
            ]))
            .await?;
        } else {
            let data = ctx.data_dir().ok_or_else(|| {
                PlatformError::MissingRequirement("`data_dir` to restore into".into())
            })?;
            ensure_dir(&data)?;
            ctx.run_checked(&ShellCommand::new("tar").args([
                "-xzf",
                &file,
                "-C",
                &data.display().to_string(),
            ]))
            .await?;
        }

        tracing::info!(service = %ctx.service_name, backup = %id, "restored");
        Ok(HandlerOutput::new(ResultDetails::Restore {
            backup_id: id,
            pre_restore_backup,
        }))
    }
    .boxed()
}

// ---------------------------------------------------------------------------
// Test / exec
// ---------------------------------------------------------------------------

pub(crate) fn test_script(ctx: &HandlerContext) -> Result<String> {
    let base = ctx.service.test_command.clone().ok_or_else(|| {
        PlatformError::MissingRequirement(format!(
            "`test_command` for service '{}'",
            ctx.service_name
        ))
    })?;
    Ok(match &ctx.options.suite {
        Some(suite) => format!("{base} {suite}"),
        None => base,
    })
}

/// Shared by every platform that runs a test command and reads its output.
pub(crate) fn test_outcome(
    ctx: &HandlerContext,
    out: &ShellOutput,
) -> Result<HandlerOutput> {
    let combined = format!("{}\n{}", out.stdout, out.stderr);
    let summary = test_summary::parse(&combined).unwrap_or_default();
    if !out.success() {
        return Err(PlatformError::Rejected(format!(
            "tests failed (exit {}): {} passed, {} failed",
            out.status_code, summary.passed, summary.failed
        )));
    }
    Ok(HandlerOutput::new(ResultDetails::Test {
        suite: ctx.options.suite.clone(),
        passed: summary.passed,
        failed: summary.failed,
        skipped: summary.skipped,
        exit_code: out.status_code,
    }))
}

fn test(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let script = test_script(ctx)?;
        let out = ctx
            .run(
                &ShellCommand::shell(&script)
                    .cwd(ctx.working_dir())
                    .envs(&ctx.requirements.environment),
            )
            .await?;
        test_outcome(ctx, &out)
    }
    .boxed()
}

pub(crate) fn exec_outcome(line: String, out: ShellOutput) -> Result<HandlerOutput> {
    if !out.success() {
        return Err(PlatformError::CommandFailed {
            program: line,
            code: out.status_code,
            stderr: out.stderr.trim().to_string(),
        });
    }
    Ok(HandlerOutput::new(ResultDetails::Exec {
        command: line,
        exit_code: out.status_code,
        stdout: out.stdout,
        stderr: out.stderr,
    }))
}

pub(crate) fn require_exec_line(ctx: &HandlerContext) -> Result<String> {
    let line = ctx.exec_line();
    if line.trim().is_empty() {
        return Err(PlatformError::MissingRequirement(
            "a command to run after `--`".into(),
        ));
    }
    Ok(line)
}

fn exec(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let line = require_exec_line(ctx)?;
        let out = ctx
            .run(
                &ShellCommand::shell(&line)
                    .cwd(ctx.working_dir())
                    .envs(&ctx.requirements.environment),
            )
            .await?;
        exec_outcome(line, out)
    }
    .boxed()
}

fn update(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let previous = match running_pid(ctx) {
            Some(pid) if pid_alive(ctx, pid).await? => {
                terminate(ctx, pid).await?;
                Some(format!("pid {pid}"))
            }
            _ => None,
        };
        let (pid, data) = spawn_service(ctx).await?;
        let current = Some(format!("pid {pid}"));
        Ok(HandlerOutput::new(ResultDetails::Update { previous, current }).save(ctx.resources(data)))
    }
    .boxed()
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

fn logs(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let n = ctx.tail();
        let log_path = match ctx.saved_data() {
            Some(ResourceData::Process { log_path, .. }) => log_path.clone(),
            _ => ctx.log_path(),
        };
        if let Some(lines) = tail_lines(&log_path, n)? {
            let entries = lines.iter().map(|l| log_entry("file", l)).collect();
            return Ok(HandlerOutput::new(ResultDetails::Logs { entries }));
        }

        let entries = system_log(ctx, n).await?;
        let output = HandlerOutput::new(ResultDetails::Logs { entries });
        Ok(output.with_metadata("log_file", log_path.display().to_string()))
    }
    .boxed()
}

/// journald on Linux, unified logging on macOS.
async fn system_log(ctx: &HandlerContext, n: usize) -> Result<Vec<LogEntry>> {
    if cfg!(target_os = "linux") && ctx.runner.is_available("journalctl") {
        let out = ctx
            .run(&ShellCommand::new("journalctl").args([
                "-u",
                &ctx.service_name,
                "-n",
                &n.to_string(),
                "--no-pager",
                "-o",
                "short-iso",
            ]))
            .await?;
        if out.success() {
            return Ok(tail_entries("journald", &out.stdout, n));
        }
    } else if cfg!(target_os = "macos") && ctx.runner.is_available("log") {
        let out = ctx
            .run(&ShellCommand::new("log").args([
                "show",
                "--last",
                "1h",
                "--style",
                "compact",
                "--predicate",
                &format!("process == \"{}\"", ctx.service_name),
            ]))
            .await?;
        if out.success() {
            return Ok(tail_entries("oslog", &out.stdout, n));
        }
    }
    Ok(Vec::new())
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

fn secret(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move { env_file_secret(ctx) }.boxed()
}

/// `.env`-file secret management, shared with the container platform.
pub(crate) fn env_file_secret(ctx: &HandlerContext) -> Result<HandlerOutput> {
    let action = ctx
        .options
        .secret
        .clone()
        .ok_or_else(|| PlatformError::MissingRequirement("a secret action".into()))?;
    let mut file = EnvFile::load(&ctx.secrets_file())?;

    let (value, keys) = match &action {
        SecretAction::Get { key } => {
            let value = file.get(key).ok_or_else(|| {
                PlatformError::Rejected(format!(
                    "secret '{key}' not found in {}",
                    file.path().display()
                ))
            })?;
            (Some(value.to_string()), Vec::new())
        }
        SecretAction::Set { key, value } => {
            file.set(key, value);
            file.save()?;
            (None, Vec::new())
        }
        SecretAction::Delete { key } => {
            if !file.remove(key) {
                return Err(PlatformError::Rejected(format!("secret '{key}' not found")));
            }
            file.save()?;
            (None, Vec::new())
        }
        SecretAction::List => (None, file.keys()),
    };

    Ok(HandlerOutput::new(ResultDetails::Secret {
        action: action.name().to_string(),
        key: action.key().map(str::to_string),
        value,
        keys,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CommandOptions, StateChange};
    use crate::testing::{ContextBuilder, ScriptedRunner};
    use semiont_core::config::ServiceConfig;
    use semiont_core::state::{PlatformResources, ServiceState};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn service() -> ServiceConfig {
        let mut s = ServiceConfig::new(ServiceType::Backend);
        s.command = Some("npm run start".into());
        s.port = Some(4000);
        s
    }

    fn saved_pid(pid: u32) -> ServiceState {
        ServiceState::new(
            "test",
            "api",
            PlatformResources::new(
                PlatformType::Posix,
                ResourceData::Process {
                    pid,
                    port: Some(4000),
                    command: "npm run start".into(),
                    log_path: PathBuf::from("/tmp/api.log"),
                },
            ),
        )
    }

    #[tokio::test]
    async fn start_spawns_and_saves_pid() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().without("lsof"));
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, service())
            .command(CommandKind::Start)
            .build(runner.clone());

        let out = start(&ctx).await.unwrap();
        let StateChange::Save(res) = &out.state else {
            panic!("expected state to be saved");
        };
        assert!(matches!(res.data, ResourceData::Process { pid: 4242, .. }));

        let spawned = runner.spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].0.display(), "sh -c 'npm run start'");
        assert_eq!(spawned[0].0.env.get("PORT").map(String::as_str), Some("4000"));
        assert!(spawned[0].1.ends_with("api.log"));
    }

    #[tokio::test]
    async fn start_refuses_busy_port() {
        let dir = TempDir::new().unwrap();
        let runner =
            Arc::new(ScriptedRunner::new().on("lsof -ti tcp:4000", ShellOutput::ok("999\n")));
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, service()).build(runner);
        let err = start(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "port 4000 is already in use by pid 999");
    }

    #[tokio::test]
    async fn start_without_command_is_missing_requirement() {
        let dir = TempDir::new().unwrap();
        let ctx = ContextBuilder::new(
            dir.path(),
            PlatformType::Posix,
            ServiceConfig::new(ServiceType::Backend),
        )
        .build(Arc::new(ScriptedRunner::new()));
        assert!(matches!(
            start(&ctx).await.unwrap_err(),
            PlatformError::MissingRequirement(_)
        ));
    }

    #[tokio::test]
    async fn already_running_is_reported_not_respawned() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().on("kill -0 77", ShellOutput::ok("")));
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, service())
            .saved(saved_pid(77))
            .build(runner.clone());
        let out = start(&ctx).await.unwrap();
        assert_eq!(out.metadata["already_running"], true);
        assert_eq!(out.state, StateChange::Keep);
        assert!(runner.spawned().is_empty());
    }

    #[tokio::test]
    async fn force_stop_kills_group_and_clears() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("kill -0 77", ShellOutput::ok(""))
                .on("kill -KILL -- -77", ShellOutput::ok("")),
        );
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, service())
            .options(CommandOptions {
                force: true,
                ..CommandOptions::default()
            })
            .saved(saved_pid(77))
            .build(runner.clone());
        let out = stop(&ctx).await.unwrap();
        assert_eq!(
            out.details,
            ResultDetails::Stop {
                was_running: true,
                graceful: false
            }
        );
        assert_eq!(out.state, StateChange::Clear);
        assert!(!runner.called("-TERM"));
    }

    #[tokio::test]
    async fn stop_waits_for_sigterm() {
        let dir = TempDir::new().unwrap();
        // Alive for the first check, gone once TERM has been delivered.
        let runner = Arc::new(
            ScriptedRunner::new()
                .once("kill -0 77", ShellOutput::ok(""))
                .on("kill -TERM -- -77", ShellOutput::ok("")),
        );
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, service())
            .saved(saved_pid(77))
            .build(runner.clone());
        let out = stop(&ctx).await.unwrap();
        assert_eq!(
            out.details,
            ResultDetails::Stop {
                was_running: true,
                graceful: true
            }
        );
        assert_eq!(out.state, StateChange::Clear);
        assert!(!runner.called("-KILL"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_escalates_when_sigterm_is_ignored() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("kill -0 77", ShellOutput::ok(""))
                .on("kill -TERM -- -77", ShellOutput::ok(""))
                .on("kill -KILL -- -77", ShellOutput::ok("")),
        );
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, service())
            .saved(saved_pid(77))
            .build(runner.clone());
        let out = stop(&ctx).await.unwrap();
        assert_eq!(
            out.details,
            ResultDetails::Stop {
                was_running: true,
                graceful: false
            }
        );
        let polls = runner.calls().iter().filter(|c| *c == "kill -0 77").count();
        assert_eq!(polls, 1 + STOP_POLLS as usize);
        assert!(runner.called("kill -KILL -- -77"));
    }

    #[tokio::test]
    async fn update_replaces_the_running_process() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .without("lsof")
                .once("kill -0 77", ShellOutput::ok(""))
                .on("kill -TERM -- -77", ShellOutput::ok("")),
        );
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, service())
            .command(CommandKind::Update)
            .saved(saved_pid(77))
            .build(runner.clone());
        let out = update(&ctx).await.unwrap();
        assert_eq!(
            out.details,
            ResultDetails::Update {
                previous: Some("pid 77".into()),
                current: Some("pid 4242".into()),
            }
        );
        let StateChange::Save(res) = &out.state else {
            panic!("expected state to be saved");
        };
        assert!(matches!(res.data, ResourceData::Process { pid: 4242, .. }));
        assert_eq!(runner.spawned().len(), 1);
    }

    #[tokio::test]
    async fn stop_without_state_is_not_running() {
        let dir = TempDir::new().unwrap();
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, service())
            .build(Arc::new(ScriptedRunner::new()));
        let out = stop(&ctx).await.unwrap();
        assert_eq!(
            out.details,
            ResultDetails::Stop {
                was_running: false,
                graceful: true
            }
        );
    }

    #[tokio::test]
    async fn check_clears_dead_pid() {
        let dir = TempDir::new().unwrap();
        // `kill -0` is unscripted, so it exits non-zero: the pid is gone.
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, service())
            .saved(saved_pid(77))
            .build(Arc::new(ScriptedRunner::new()));
        let out = check(&ctx).await.unwrap();
        assert!(matches!(
            out.details,
            ResultDetails::Check {
                status: ServiceStatus::Stopped,
                ..
            }
        ));
        assert_eq!(out.state, StateChange::Clear);
    }

    #[tokio::test]
    async fn provision_creates_missing_dirs_once() {
        let dir = TempDir::new().unwrap();
        let mut svc = service();
        svc.data_dir = Some("data/api".into());
        let build = || {
            ContextBuilder::new(dir.path(), PlatformType::Posix, svc.clone())
                .build(Arc::new(ScriptedRunner::new()))
        };

        let first = provision(&build()).await.unwrap();
        let ResultDetails::Provision { created } = first.details else {
            panic!("wrong details");
        };
        assert_eq!(created.len(), 3);
        assert!(dir.path().join("data/api").is_dir());

        let second = provision(&build()).await.unwrap();
        assert_eq!(second.details, ResultDetails::Provision { created: vec![] });
    }

    #[tokio::test]
    async fn backup_tars_data_dir_and_restore_finds_it() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        let mut svc = service();
        svc.data_dir = Some("data".into());
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("tar -czf", ShellOutput::ok(""))
                .on("tar -xzf", ShellOutput::ok("")),
        );

        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, svc.clone())
            .options(CommandOptions {
                backup_id: Some("nightly".into()),
                ..CommandOptions::default()
            })
            .build(runner.clone());
        let out = backup(&ctx).await.unwrap();
        let ResultDetails::Backup { backup_id, location, .. } = out.details else {
            panic!("wrong details");
        };
        assert_eq!(backup_id, "nightly");
        assert!(location.ends_with("nightly.tar.gz"));

        // The scripted tar wrote nothing; put a file where it would have.
        std::fs::write(&location, b"archive").unwrap();

        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, svc)
            .build(runner.clone());
        let out = restore(&ctx).await.unwrap();
        assert_eq!(
            out.details,
            ResultDetails::Restore {
                backup_id: "nightly".into(),
                pre_restore_backup: None
            }
        );
        assert!(runner.called("tar -xzf"));
    }

    #[tokio::test]
    async fn restore_can_snapshot_current_data_first() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        let mut svc = service();
        svc.data_dir = Some("data".into());
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("tar -czf", ShellOutput::ok(""))
                .on("tar -xzf", ShellOutput::ok("")),
        );
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, svc)
            .options(CommandOptions {
                backup_id: Some("nightly".into()),
                pre_restore_backup: true,
                ..CommandOptions::default()
            })
            .build(runner.clone());
        ensure_dir(&ctx.backups_dir()).unwrap();
        std::fs::write(ctx.backups_dir().join("nightly.tar.gz"), b"archive").unwrap();

        let out = restore(&ctx).await.unwrap();
        let ResultDetails::Restore {
            backup_id,
            pre_restore_backup: Some(pre),
        } = out.details
        else {
            panic!("expected a pre-restore backup");
        };
        assert_eq!(backup_id, "nightly");
        assert!(pre.starts_with("pre-restore-"));

        let calls = runner.calls();
        let snapshot = calls.iter().position(|c| c.contains(&format!("{pre}.tar.gz")));
        let extract = calls.iter().position(|c| c.starts_with("tar -xzf"));
        assert!(snapshot.unwrap() < extract.unwrap());
    }

    #[tokio::test]
    async fn backup_prefers_pg_dump_for_databases() {
        let dir = TempDir::new().unwrap();
        let mut svc = ServiceConfig::new(ServiceType::Database);
        svc.database_url = Some("postgres://localhost/semiont".into());
        let runner = Arc::new(ScriptedRunner::new().on("pg_dump", ShellOutput::ok("")));
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, svc).build(runner.clone());
        backup(&ctx).await.unwrap();
        assert!(runner.called("pg_dump --format=custom --file"));
    }

    #[tokio::test]
    async fn failing_tests_fail_the_command() {
        let dir = TempDir::new().unwrap();
        let mut svc = service();
        svc.test_command = Some("npm test".into());
        let runner = Arc::new(ScriptedRunner::new().on(
            "npm test",
            ShellOutput {
                status_code: 1,
                stdout: "Tests:       2 failed, 8 passed, 10 total\n".into(),
                stderr: String::new(),
            },
        ));
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, svc).build(runner);
        let err = test(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "tests failed (exit 1): 8 passed, 2 failed");
    }

    #[tokio::test]
    async fn exec_runs_in_working_dir() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().on("ls -la", ShellOutput::ok("total 0\n")));
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, service())
            .options(CommandOptions {
                exec_args: vec!["ls".into(), "-la".into()],
                ..CommandOptions::default()
            })
            .build(runner.clone());
        let out = exec(&ctx).await.unwrap();
        assert!(matches!(out.details, ResultDetails::Exec { exit_code: 0, .. }));
        assert_eq!(runner.commands()[0].cwd.as_deref(), Some(dir.path()));
    }

    #[tokio::test]
    async fn logs_tail_the_service_log() {
        let dir = TempDir::new().unwrap();
        let ctx = ContextBuilder::new(dir.path(), PlatformType::Posix, service())
            .options(CommandOptions {
                tail: Some(2),
                ..CommandOptions::default()
            })
            .build(Arc::new(ScriptedRunner::new()));
        let log = ctx.log_path();
        std::fs::create_dir_all(log.parent().unwrap()).unwrap();
        std::fs::write(&log, "one\ntwo\nthree\n").unwrap();

        let out = logs(&ctx).await.unwrap();
        let ResultDetails::Logs { entries } = out.details else {
            panic!("wrong details");
        };
        let msgs: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn secrets_round_trip_through_env_file() {
        let dir = TempDir::new().unwrap();
        let ctx_for = |action: SecretAction| {
            ContextBuilder::new(dir.path(), PlatformType::Posix, service())
                .options(CommandOptions {
                    secret: Some(action),
                    ..CommandOptions::default()
                })
                .build(Arc::new(ScriptedRunner::new()))
        };

        secret(&ctx_for(SecretAction::Set {
            key: "API_KEY".into(),
            value: "s3cret".into(),
        }))
        .await
        .unwrap();
        assert!(dir.path().join(".env").is_file());

        let got = secret(&ctx_for(SecretAction::Get {
            key: "API_KEY".into(),
        }))
        .await
        .unwrap();
        assert!(matches!(
            got.details,
            ResultDetails::Secret { value: Some(ref v), .. } if v == "s3cret"
        ));

        let missing = secret(&ctx_for(SecretAction::Get {
            key: "NOPE".into(),
        }))
        .await;
        assert!(missing.is_err());
    }
}
