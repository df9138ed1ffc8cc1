//! Shell-out driver for the external CLIs the platforms wrap (`aws`,
//! `docker`, `kill`, `tar`, ...).
//!
//! Handlers build a [`ShellCommand`] and hand it to a [`CommandRunner`]. The
//! production runner is [`SystemRunner`]; tests substitute a scripted runner
//! so handler logic can be exercised without the real tools installed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{PlatformError, Result};

// ─── ShellCommand ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub stdin: Option<String>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// `sh -c <script>`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The command line as it would be typed, for logs and error messages.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                out.push('\'');
                out.push_str(arg);
                out.push('\'');
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

// ─── ShellOutput ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShellOutput {
    /// Exit code; `-1` when the process was killed by a signal.
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status_code: code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    pub fn stdout_json<T: DeserializeOwned>(&self, what: &str) -> Result<T> {
        serde_json::from_str(self.stdout.trim()).map_err(|source| PlatformError::Parse {
            what: what.to_string(),
            source,
        })
    }

    /// Turn a non-zero exit into [`PlatformError::CommandFailed`].
    pub fn checked(self, program: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let stderr = if self.stderr.trim().is_empty() {
            self.stdout.trim().chars().take(500).collect()
        } else {
            self.stderr.trim().chars().take(500).collect()
        };
        Err(PlatformError::CommandFailed {
            program: program.to_string(),
            code: self.status_code,
            stderr,
        })
    }
}

// ─── CommandRunner ────────────────────────────────────────────────────────

pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. A non-zero exit is reported in
    /// [`ShellOutput::status_code`], not as an error.
    fn run<'a>(&'a self, cmd: &'a ShellCommand) -> BoxFuture<'a, Result<ShellOutput>>;

    /// Start a long-running process in the background with stdout and
    /// stderr appended to `log_path`. Returns the pid.
    fn spawn_detached(&self, cmd: &ShellCommand, log_path: &Path) -> Result<u32>;

    fn is_available(&self, program: &str) -> bool;
}

/// Run `cmd` and fail on a non-zero exit.
pub async fn run_checked(runner: &dyn CommandRunner, cmd: &ShellCommand) -> Result<ShellOutput> {
    runner.run(cmd).await?.checked(&cmd.program)
}

// ─── SystemRunner ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run<'a>(&'a self, cmd: &'a ShellCommand) -> BoxFuture<'a, Result<ShellOutput>> {
        async move {
            tracing::debug!(command = %cmd.display(), "exec");
            let mut command = Command::new(&cmd.program);
            command
                .args(&cmd.args)
                .envs(&cmd.env)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .stdin(if cmd.stdin.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                });
            if let Some(dir) = &cmd.cwd {
                command.current_dir(dir);
            }

            let mut child = command.spawn().map_err(|source| PlatformError::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

            if let Some(input) = &cmd.stdin {
                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(input.as_bytes()).await?;
                    stdin.flush().await?;
                }
            }

            let output = child.wait_with_output().await?;
            let result = ShellOutput {
                status_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            if !result.success() {
                tracing::debug!(command = %cmd.display(), code = result.status_code, "exec failed");
            }
            Ok(result)
        }
        .boxed()
    }

    fn spawn_detached(&self, cmd: &ShellCommand, log_path: &Path) -> Result<u32> {
        tracing::debug!(command = %cmd.display(), log = %log_path.display(), "spawn detached");
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let log_err = log.try_clone()?;

        let mut command = std::process::Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(&cmd.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }
        // Own process group so the service outlives this CLI invocation and
        // doesn't receive the terminal's Ctrl-C.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|source| PlatformError::Spawn {
            program: cmd.program.clone(),
            source,
        })?;
        Ok(child.id())
    }

    fn is_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}
