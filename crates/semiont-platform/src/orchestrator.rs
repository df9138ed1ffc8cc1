//! Resolves a service to its platform strategy and handler, runs it, and
//! folds the outcome into a [`CommandResult`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use semiont_core::config::EnvironmentConfig;
use semiont_core::requirements::ServiceRequirements;
use semiont_core::results::CommandResult;
use semiont_core::state::{ServiceState, StateManager};
use semiont_core::types::{CommandKind, PlatformType, ServiceType};

use crate::context::{CommandOptions, HandlerContext, StateChange};
use crate::registry::{HandlerDescriptor, HandlerRegistry};
use crate::shell::CommandRunner;
use crate::strategy::PlatformStrategy;
use crate::{platforms, PlatformError, Result};

pub struct Orchestrator {
    project_root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    state: StateManager,
    registry: HandlerRegistry,
    strategies: HashMap<PlatformType, Arc<dyn PlatformStrategy>>,
}

impl Orchestrator {
    /// All built-in platforms.
    pub fn new(project_root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_strategies(project_root, runner, platforms::builtin())
    }

    pub fn with_strategies(
        project_root: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        strategies: Vec<Arc<dyn PlatformStrategy>>,
    ) -> Self {
        let project_root = project_root.into();
        let mut registry = HandlerRegistry::new();
        let mut by_platform = HashMap::new();
        for strategy in strategies {
            registry.register_all(strategy.handlers());
            by_platform.insert(strategy.platform(), strategy);
        }
        tracing::debug!(handlers = registry.len(), platforms = by_platform.len(), "registry ready");
        Self {
            state: StateManager::new(project_root.clone()),
            project_root,
            runner,
            registry,
            strategies: by_platform,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Handler for a service type on a strategy, honouring the strategy's
    /// opt-out from `generic` fallbacks.
    fn resolve_handler(
        &self,
        strategy: &dyn PlatformStrategy,
        service_type: ServiceType,
        command: CommandKind,
    ) -> Option<HandlerDescriptor> {
        let descriptor = self
            .registry
            .lookup(strategy.platform(), service_type, command)?;
        if descriptor.service_type != service_type
            && !strategy.falls_back_to_generic(service_type)
        {
            return None;
        }
        Some(*descriptor)
    }

    /// Run one command against one service.
    ///
    /// Configuration problems (unknown service, no platform) are returned as
    /// errors. Everything that goes wrong inside a handler becomes a failed
    /// [`CommandResult`].
    pub async fn execute(
        &self,
        env: &Arc<EnvironmentConfig>,
        service: &str,
        command: CommandKind,
        options: &CommandOptions,
        platform_override: Option<PlatformType>,
    ) -> Result<CommandResult> {
        let started = Instant::now();
        let service_cfg = env.service(service)?.clone();
        let platform = env.resolve_platform(service, platform_override)?;
        let strategy = self
            .strategies
            .get(&platform)
            .cloned()
            .ok_or(PlatformError::UnknownPlatform(platform))?;

        let mut saved = match self.state.load(&env.name, service) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(service, error = %e, "ignoring unreadable state record");
                None
            }
        };
        if let Some(s) = &saved {
            if s.platform != platform {
                tracing::warn!(service, saved = %s.platform, requested = %platform, "ignoring state recorded for another platform");
                saved = None;
            }
        }

        let mut ctx = HandlerContext {
            project_root: self.project_root.clone(),
            environment: Arc::clone(env),
            service_name: service.to_string(),
            requirements: ServiceRequirements::from_config(service, &service_cfg),
            service: service_cfg,
            platform,
            command,
            options: options.clone(),
            saved,
            runner: Arc::clone(&self.runner),
            state: self.state.clone(),
        };
        let header = ctx.header();

        let Some(descriptor) =
            self.resolve_handler(strategy.as_ref(), ctx.service.service_type, command)
        else {
            let err = PlatformError::NoHandler {
                platform,
                service_type: ctx.service.service_type,
                command,
            };
            return Ok(CommandResult::failed(header, err.to_string()).with_duration(started.elapsed()));
        };

        tracing::info!(service, %platform, %command, environment = %env.name, "dispatch");

        if options.dry_run {
            let mut metadata = serde_json::Map::new();
            metadata.insert("dry_run".into(), true.into());
            metadata.insert("handler".into(), descriptor.key().to_string().into());
            return Ok(CommandResult::succeeded(header, None, metadata).with_duration(started.elapsed()));
        }

        if descriptor.requires_discovery && ctx.saved.is_none() {
            match strategy.discover(&ctx).await {
                Ok(Some(resources)) => {
                    tracing::debug!(service, resource = %resources.data.identifier(), "discovered resource");
                    ctx.saved = Some(ServiceState::new(&env.name, service, resources));
                }
                Ok(None) => {}
                Err(e) => {
                    return Ok(CommandResult::failed(header, format!("discovery failed: {e}"))
                        .with_duration(started.elapsed()));
                }
            }
        }

        let result = match (descriptor.handler)(&ctx).await {
            Ok(output) => match self.apply_state(&env.name, service, output.state) {
                Ok(()) => CommandResult::succeeded(header, Some(output.details), output.metadata),
                Err(e) => CommandResult::failed(header, format!("state update failed: {e}")),
            },
            Err(e) => CommandResult::failed(header, e.to_string()),
        };

        if let Some(err) = result.error() {
            tracing::warn!(service, %platform, %command, error = %err, "command failed");
        }
        Ok(result.with_duration(started.elapsed()))
    }

    /// Configuration checks [`Orchestrator::execute`] would fail on, without
    /// touching any resource.
    fn preflight(
        &self,
        env: &EnvironmentConfig,
        service: &str,
        platform_override: Option<PlatformType>,
    ) -> Result<()> {
        let platform = env.resolve_platform(service, platform_override)?;
        if !self.strategies.contains_key(&platform) {
            return Err(PlatformError::UnknownPlatform(platform));
        }
        Ok(())
    }

    /// Run `command` for each service in turn. `stop` walks the list in
    /// reverse so dependents go down before what they depend on.
    ///
    /// Every service is checked for configuration errors first, so a bad
    /// entry fails the batch before anything has been started or stopped.
    pub async fn execute_many(
        &self,
        env: &Arc<EnvironmentConfig>,
        services: &[String],
        command: CommandKind,
        options: &CommandOptions,
        platform_override: Option<PlatformType>,
    ) -> Result<Vec<CommandResult>> {
        let mut ordered: Vec<&String> = services.iter().collect();
        if command == CommandKind::Stop {
            ordered.reverse();
        }
        for service in &ordered {
            self.preflight(env, service, platform_override)?;
        }
        let mut results = Vec::with_capacity(ordered.len());
        for service in ordered {
            results.push(
                self.execute(env, service, command, options, platform_override)
                    .await?,
            );
        }
        Ok(results)
    }

    fn apply_state(&self, env: &str, service: &str, change: StateChange) -> Result<()> {
        match change {
            StateChange::Keep => {}
            StateChange::Save(resources) => {
                self.state
                    .save(&ServiceState::new(env, service, resources))?;
            }
            StateChange::Clear => {
                self.state.clear(env, service)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HandlerOutput;
    use crate::registry::HandlerDescriptor;
    use crate::testing::ScriptedRunner;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use semiont_core::config::ServiceConfig;
    use semiont_core::results::ResultDetails;
    use semiont_core::state::{PlatformResources, ResourceData};
    use semiont_core::types::ServiceStatus;
    use tempfile::TempDir;

    fn mock_env() -> Arc<EnvironmentConfig> {
        let mut env = EnvironmentConfig::new("local");
        env.default_platform = Some(PlatformType::Mock);
        let mut backend = ServiceConfig::new(ServiceType::Backend);
        backend.port = Some(4000);
        env.services.insert("backend".into(), backend);
        env.services
            .insert("frontend".into(), ServiceConfig::new(ServiceType::Frontend));
        let mut flaky = ServiceConfig::new(ServiceType::Generic);
        flaky.simulate_failure = vec![CommandKind::Start];
        env.services.insert("flaky".into(), flaky);
        Arc::new(env)
    }

    fn orchestrator(dir: &TempDir) -> Orchestrator {
        Orchestrator::new(dir.path(), Arc::new(ScriptedRunner::new()))
    }

    #[tokio::test]
    async fn start_check_stop_roundtrip_on_mock() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let env = mock_env();
        let opts = CommandOptions::default();

        let start = orch
            .execute(&env, "backend", CommandKind::Start, &opts, None)
            .await
            .unwrap();
        assert!(start.success(), "{:?}", start.error());
        assert!(orch.state().load("local", "backend").unwrap().is_some());

        let check = orch
            .execute(&env, "backend", CommandKind::Check, &opts, None)
            .await
            .unwrap();
        assert!(matches!(
            check.details,
            Some(ResultDetails::Check {
                status: ServiceStatus::Running,
                ..
            })
        ));

        let stop = orch
            .execute(&env, "backend", CommandKind::Stop, &opts, None)
            .await
            .unwrap();
        assert!(stop.success());
        assert!(orch.state().load("local", "backend").unwrap().is_none());

        let check = orch
            .execute(&env, "backend", CommandKind::Check, &opts, None)
            .await
            .unwrap();
        assert_eq!(check.summary(), "stopped");
    }

    #[tokio::test]
    async fn handler_errors_become_failed_results() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let result = orch
            .execute(
                &mock_env(),
                "flaky",
                CommandKind::Start,
                &CommandOptions::default(),
                None,
            )
            .await
            .unwrap();
        assert!(!result.success());
        assert_eq!(result.error(), Some("simulated failure: start"));
        assert!(orch.state().load("local", "flaky").unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_service_is_an_error() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let err = orch
            .execute(
                &mock_env(),
                "nope",
                CommandKind::Start,
                &CommandOptions::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn missing_handler_is_a_failed_result() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let result = orch
            .execute(
                &mock_env(),
                "backend",
                CommandKind::Start,
                &CommandOptions::default(),
                Some(PlatformType::External),
            )
            .await
            .unwrap();
        assert!(!result.success());
        assert_eq!(
            result.error(),
            Some("no handler for external/backend/start")
        );
    }

    #[tokio::test]
    async fn dry_run_skips_handler() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let opts = CommandOptions {
            dry_run: true,
            ..CommandOptions::default()
        };
        let result = orch
            .execute(&mock_env(), "flaky", CommandKind::Start, &opts, None)
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.metadata["dry_run"], true);
        assert_eq!(result.metadata["handler"], "mock/generic/start");
        assert!(orch.state().load("local", "flaky").unwrap().is_none());
    }

    #[tokio::test]
    async fn execute_many_stops_in_reverse() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let env = mock_env();
        let services = vec!["backend".to_string(), "frontend".to_string()];
        let results = orch
            .execute_many(
                &env,
                &services,
                CommandKind::Stop,
                &CommandOptions::default(),
                None,
            )
            .await
            .unwrap();
        let order: Vec<&str> = results.iter().map(|r| r.service.as_str()).collect();
        assert_eq!(order, vec!["frontend", "backend"]);
    }

    #[tokio::test]
    async fn execute_many_checks_every_service_before_running() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let mut env = EnvironmentConfig::new("local");
        let mut alpha = ServiceConfig::new(ServiceType::Backend);
        alpha.platform = Some(PlatformType::Mock);
        env.services.insert("alpha".into(), alpha);
        env.services
            .insert("beta".into(), ServiceConfig::new(ServiceType::Backend));
        let services = vec!["alpha".to_string(), "beta".to_string()];

        let err = orch
            .execute_many(
                &Arc::new(env),
                &services,
                CommandKind::Start,
                &CommandOptions::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no platform configured for service 'beta'"));
        assert!(orch.state().load("local", "alpha").unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_state_is_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let env = mock_env();
        let opts = CommandOptions::default();
        orch.execute(&env, "frontend", CommandKind::Start, &opts, None)
            .await
            .unwrap();
        let broken = semiont_core::paths::state_file(dir.path(), "local", "backend");
        std::fs::create_dir_all(broken.parent().unwrap()).unwrap();
        std::fs::write(&broken, "{").unwrap();

        let services = vec!["backend".to_string(), "frontend".to_string()];
        let results = orch
            .execute_many(&env, &services, CommandKind::Check, &opts, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].summary(), "stopped");
        assert_eq!(results[1].summary(), "running");
    }

    // A strategy whose check needs discovery, to exercise that path.
    struct Discovering;

    fn echo_saved(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
        async move {
            Ok(HandlerOutput::new(ResultDetails::Check {
                status: ServiceStatus::Running,
                health: None,
                resources: ctx.saved.as_ref().map(|s| s.resources.clone()),
            }))
        }
        .boxed()
    }

    impl PlatformStrategy for Discovering {
        fn platform(&self) -> PlatformType {
            PlatformType::External
        }

        fn handlers(&self) -> Vec<HandlerDescriptor> {
            vec![HandlerDescriptor::new(
                PlatformType::External,
                ServiceType::Generic,
                CommandKind::Check,
                echo_saved,
            )
            .with_discovery()]
        }

        fn discover<'a>(
            &'a self,
            _ctx: &'a HandlerContext,
        ) -> BoxFuture<'a, Result<Option<PlatformResources>>> {
            async {
                Ok(Some(PlatformResources::new(
                    PlatformType::External,
                    ResourceData::External {
                        endpoint: "https://semiont.example".into(),
                    },
                )))
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn discovery_fills_missing_state() {
        let dir = TempDir::new().unwrap();
        let orch = Orchestrator::with_strategies(
            dir.path(),
            Arc::new(ScriptedRunner::new()),
            vec![Arc::new(Discovering)],
        );
        let result = orch
            .execute(
                &mock_env(),
                "backend",
                CommandKind::Check,
                &CommandOptions::default(),
                Some(PlatformType::External),
            )
            .await
            .unwrap();
        let Some(ResultDetails::Check {
            resources: Some(res),
            ..
        }) = result.details
        else {
            panic!("expected discovered resources, got {result:?}");
        };
        assert_eq!(res.data.identifier(), "https://semiont.example");
        // Discovery alone does not persist anything.
        assert!(orch.state().load("local", "backend").unwrap().is_none());
    }
}
