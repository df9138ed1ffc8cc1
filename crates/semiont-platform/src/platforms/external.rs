//! Services run by someone else. We can only look at them.

use futures::future::BoxFuture;
use futures::FutureExt;
use semiont_core::results::ResultDetails;
use semiont_core::state::ResourceData;
use semiont_core::types::{CommandKind, PlatformType, ServiceStatus, ServiceType};

use super::join_url;
use crate::context::{HandlerContext, HandlerOutput};
use crate::registry::HandlerDescriptor;
use crate::strategy::PlatformStrategy;
use crate::{health, PlatformError, Result};

pub struct ExternalStrategy;

impl PlatformStrategy for ExternalStrategy {
    fn platform(&self) -> PlatformType {
        PlatformType::External
    }

    fn handlers(&self) -> Vec<HandlerDescriptor> {
        vec![HandlerDescriptor::new(
            PlatformType::External,
            ServiceType::Generic,
            CommandKind::Check,
            check,
        )]
    }
}

/// `url` (plus the health path), else `localhost:<port>` with the path.
fn probe_url(ctx: &HandlerContext) -> Result<String> {
    if let Some(url) = &ctx.service.url {
        return Ok(join_url(url, ctx.requirements.network.health_check_path.as_deref()));
    }
    ctx.requirements
        .health_check_url("localhost")
        .ok_or_else(|| {
            PlatformError::MissingRequirement(format!(
                "`url`, or `port` and `health_check_path`, for service '{}'",
                ctx.service_name
            ))
        })
}

fn check(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let url = probe_url(ctx)?;
        let report = health::probe(&url, health::DEFAULT_TIMEOUT).await;
        let status = match (report.healthy, report.status_code) {
            (true, _) => ServiceStatus::Running,
            (false, Some(_)) => ServiceStatus::Degraded,
            (false, None) => ServiceStatus::Unknown,
        };
        Ok(HandlerOutput::new(ResultDetails::Check {
            status,
            health: Some(report),
            resources: Some(ctx.resources(ResourceData::External { endpoint: url })),
        }))
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StateChange;
    use crate::testing::{ContextBuilder, ScriptedRunner};
    use semiont_core::config::ServiceConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn probes_configured_url_without_touching_state() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/health")
            .with_status(200)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let mut svc = ServiceConfig::new(ServiceType::Backend);
        svc.url = Some(server.url());
        svc.health_check_path = Some("/api/health".into());
        let ctx = ContextBuilder::new(dir.path(), PlatformType::External, svc)
            .build(Arc::new(ScriptedRunner::new()));

        let out = check(&ctx).await.unwrap();
        assert_eq!(out.state, StateChange::Keep);
        let ResultDetails::Check { status, health, .. } = out.details else {
            panic!("wrong details");
        };
        assert_eq!(status, ServiceStatus::Running);
        assert_eq!(health.unwrap().status_code, Some(200));
    }

    #[tokio::test]
    async fn error_status_is_degraded() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/").with_status(502).create_async().await;

        let dir = TempDir::new().unwrap();
        let mut svc = ServiceConfig::new(ServiceType::Frontend);
        svc.url = Some(format!("{}/", server.url()));
        let ctx = ContextBuilder::new(dir.path(), PlatformType::External, svc)
            .build(Arc::new(ScriptedRunner::new()));
        let out = check(&ctx).await.unwrap();
        assert_eq!(out.details.summary(), "degraded (unhealthy: HTTP 502)");
    }

    #[tokio::test]
    async fn nothing_to_probe_is_missing_requirement() {
        let dir = TempDir::new().unwrap();
        let ctx = ContextBuilder::new(
            dir.path(),
            PlatformType::External,
            ServiceConfig::new(ServiceType::Graph),
        )
        .build(Arc::new(ScriptedRunner::new()));
        assert!(matches!(
            check(&ctx).await.unwrap_err(),
            PlatformError::MissingRequirement(_)
        ));
    }
}
