//! Test doubles shared by the handler tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use semiont_core::config::{EnvironmentConfig, ServiceConfig};
use semiont_core::requirements::ServiceRequirements;
use semiont_core::state::{ServiceState, StateManager};
use semiont_core::types::{CommandKind, PlatformType};

use crate::context::{CommandOptions, HandlerContext};
use crate::shell::{CommandRunner, ShellCommand, ShellOutput};
use crate::Result;

/// Answers commands from a list of `(substring, output)` rules matched
/// against [`ShellCommand::display`]; first match wins. Rules added with
/// [`ScriptedRunner::once`] are dropped after their first match. Unmatched
/// commands exit 127. Every call is recorded.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, ShellOutput, bool)>>,
    calls: Mutex<Vec<ShellCommand>>,
    spawned: Mutex<Vec<(ShellCommand, PathBuf)>>,
    missing: HashSet<String>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, output: ShellOutput) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), output, false));
        self
    }

    pub fn once(self, pattern: &str, output: ShellOutput) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), output, true));
        self
    }

    pub fn without(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(ShellCommand::display)
            .collect()
    }

    pub fn commands(&self) -> Vec<ShellCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spawned(&self) -> Vec<(ShellCommand, PathBuf)> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn called(&self, pattern: &str) -> bool {
        self.calls().iter().any(|c| c.contains(pattern))
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, cmd: &'a ShellCommand) -> BoxFuture<'a, Result<ShellOutput>> {
        async move {
            self.calls.lock().unwrap().push(cmd.clone());
            let line = cmd.display();
            let mut rules = self.rules.lock().unwrap();
            let Some(i) = rules
                .iter()
                .position(|(pattern, _, _)| line.contains(pattern.as_str()))
            else {
                return Ok(ShellOutput::failed(127, format!("unscripted: {line}")));
            };
            if rules[i].2 {
                return Ok(rules.remove(i).1);
            }
            Ok(rules[i].1.clone())
        }
        .boxed()
    }

    fn spawn_detached(&self, cmd: &ShellCommand, log_path: &Path) -> Result<u32> {
        self.spawned
            .lock()
            .unwrap()
            .push((cmd.clone(), log_path.to_path_buf()));
        Ok(4242)
    }

    fn is_available(&self, program: &str) -> bool {
        !self.missing.contains(program)
    }
}

/// Handler context for one service of a throwaway `test` environment.
pub struct ContextBuilder {
    pub root: PathBuf,
    pub env: EnvironmentConfig,
    pub service: ServiceConfig,
    pub platform: PlatformType,
    pub command: CommandKind,
    pub options: CommandOptions,
    pub saved: Option<ServiceState>,
}

impl ContextBuilder {
    pub fn new(root: &Path, platform: PlatformType, service: ServiceConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            env: EnvironmentConfig::new("test"),
            service,
            platform,
            command: CommandKind::Check,
            options: CommandOptions::default(),
            saved: None,
        }
    }

    pub fn command(mut self, command: CommandKind) -> Self {
        self.command = command;
        self
    }

    pub fn options(mut self, options: CommandOptions) -> Self {
        self.options = options;
        self
    }

    pub fn saved(mut self, saved: ServiceState) -> Self {
        self.saved = Some(saved);
        self
    }

    pub fn build(self, runner: Arc<dyn CommandRunner>) -> HandlerContext {
        let mut env = self.env;
        env.services.insert("api".into(), self.service.clone());
        HandlerContext {
            project_root: self.root.clone(),
            environment: Arc::new(env),
            service_name: "api".into(),
            requirements: ServiceRequirements::from_config("api", &self.service),
            service: self.service,
            platform: self.platform,
            command: self.command,
            options: self.options,
            saved: self.saved,
            runner,
            state: StateManager::new(self.root),
        }
    }
}
