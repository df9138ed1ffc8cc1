//! AWS-hosted services, driven entirely through the `aws` CLI.
//!
//! Compute services (`frontend`, `backend`, `mcp`, `inference`, `generic`)
//! map to ECS services. Data services map to managed resources: `database`
//! to RDS, `graph` to Neptune and `filesystem` to EFS. Those three never
//! fall back to the ECS handlers.
//!
//! Resource names default to `semiont-<env>-<service>` and the cluster to
//! `semiont-<env>`; every name can be pinned under the service's `aws:` key.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use semiont_core::results::ResultDetails;
use semiont_core::state::{PlatformResources, ResourceData};
use semiont_core::types::{CommandKind, PlatformType, ServiceStatus, ServiceType};

use super::posix::{exec_outcome, git_revision, require_exec_line};
use super::{join_url, tail_entries};
use crate::context::{HandlerContext, HandlerOutput, SecretAction};
use crate::registry::{HandlerDescriptor, HandlerFn};
use crate::shell::ShellCommand;
use crate::strategy::PlatformStrategy;
use crate::{health, PlatformError, Result};

const ECS_TYPES: [ServiceType; 5] = [
    ServiceType::Frontend,
    ServiceType::Backend,
    ServiceType::Mcp,
    ServiceType::Inference,
    ServiceType::Generic,
];

const DATA_TYPES: [ServiceType; 3] = [
    ServiceType::Database,
    ServiceType::Graph,
    ServiceType::Filesystem,
];

/// Keys `describe-task-definition` returns that `register-task-definition`
/// rejects.
const READ_ONLY_TASK_KEYS: &[&str] = &[
    "taskDefinitionArn",
    "revision",
    "status",
    "requiresAttributes",
    "compatibilities",
    "registeredAt",
    "registeredBy",
    "deregisteredAt",
];

pub struct AwsStrategy;

impl PlatformStrategy for AwsStrategy {
    fn platform(&self) -> PlatformType {
        PlatformType::Aws
    }

    fn handlers(&self) -> Vec<HandlerDescriptor> {
        let d = |t, c, h: HandlerFn| HandlerDescriptor::new(PlatformType::Aws, t, c, h);
        let mut out = Vec::new();

        // Discovery-backed ECS commands need a service handle to act on.
        for t in ECS_TYPES {
            out.push(d(t, CommandKind::Start, ecs_start));
            out.push(d(t, CommandKind::Stop, ecs_stop).with_discovery());
            out.push(d(t, CommandKind::Check, ecs_check).with_discovery());
            out.push(d(t, CommandKind::Update, ecs_update).with_discovery());
            out.push(d(t, CommandKind::Logs, ecs_logs).with_discovery());
            out.push(d(t, CommandKind::Exec, ecs_exec).with_discovery());
            out.push(d(t, CommandKind::Publish, ecs_publish));
        }

        out.push(d(ServiceType::Database, CommandKind::Start, rds_start));
        out.push(d(ServiceType::Database, CommandKind::Stop, rds_stop));
        out.push(d(ServiceType::Database, CommandKind::Check, rds_check));
        out.push(d(ServiceType::Database, CommandKind::Backup, rds_backup));
        out.push(d(ServiceType::Database, CommandKind::Restore, rds_restore));

        out.push(d(ServiceType::Graph, CommandKind::Start, neptune_start));
        out.push(d(ServiceType::Graph, CommandKind::Stop, neptune_stop));
        out.push(d(ServiceType::Graph, CommandKind::Check, neptune_check));
        out.push(d(ServiceType::Graph, CommandKind::Backup, neptune_backup));

        out.push(d(ServiceType::Filesystem, CommandKind::Check, efs_check));

        out.push(d(ServiceType::Generic, CommandKind::Provision, stack_provision));
        out.push(d(ServiceType::Generic, CommandKind::Secret, secret));
        for t in DATA_TYPES {
            out.push(d(t, CommandKind::Provision, stack_provision));
            out.push(d(t, CommandKind::Secret, secret));
        }
        out
    }

    fn falls_back_to_generic(&self, service_type: ServiceType) -> bool {
        !DATA_TYPES.contains(&service_type)
    }

    fn discover<'a>(
        &'a self,
        ctx: &'a HandlerContext,
    ) -> BoxFuture<'a, Result<Option<PlatformResources>>> {
        async move {
            // Data services are addressed by configured identifiers.
            if DATA_TYPES.contains(&ctx.service.service_type) {
                return Ok(None);
            }
            let (cluster, service) = ecs_target(ctx);
            let data = describe_ecs(ctx, &cluster, &service)
                .await?
                .filter(|s| s.status != "INACTIVE")
                .map(|s| ecs_data(ctx, &cluster, &s));
            Ok(data.map(|d| ctx.resources(d)))
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// CLI plumbing
// ---------------------------------------------------------------------------

fn region(ctx: &HandlerContext) -> Option<String> {
    ctx.environment.aws().region
}

/// `aws <args> [--region r]` with raw output.
fn aws_cmd(ctx: &HandlerContext, args: &[&str]) -> ShellCommand {
    let mut cmd = ShellCommand::new("aws").args(args.iter().copied());
    if let Some(r) = region(ctx) {
        cmd = cmd.args(["--region", r.as_str()]);
    }
    cmd
}

/// `aws <args> --output json [--region r]`
fn aws_json(ctx: &HandlerContext, args: &[&str]) -> ShellCommand {
    aws_cmd(ctx, args).args(["--output", "json"])
}

async fn call<T: DeserializeOwned>(ctx: &HandlerContext, args: &[&str]) -> Result<T> {
    let what = format!("aws {}", args.iter().take(2).copied().collect::<Vec<_>>().join(" "));
    ctx.run_checked(&aws_json(ctx, args))
        .await?
        .stdout_json(&what)
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

fn default_cluster(ctx: &HandlerContext) -> String {
    ctx.service
        .aws()
        .cluster
        .or_else(|| ctx.environment.aws().cluster)
        .unwrap_or_else(|| format!("semiont-{}", ctx.env_name()))
}

/// Cluster and service to address: the persisted handle, else config.
fn ecs_target(ctx: &HandlerContext) -> (String, String) {
    if let Some(ResourceData::Ecs {
        cluster,
        service_name,
        ..
    }) = ctx.saved_data()
    {
        return (cluster.clone(), service_name.clone());
    }
    let service = ctx
        .service
        .aws()
        .service_name
        .unwrap_or_else(|| ctx.resource_name());
    (default_cluster(ctx), service)
}

fn db_instance(ctx: &HandlerContext) -> String {
    ctx.service
        .aws()
        .db_instance
        .unwrap_or_else(|| ctx.resource_name())
}

fn graph_cluster(ctx: &HandlerContext) -> String {
    ctx.service
        .aws()
        .cluster_identifier
        .unwrap_or_else(|| ctx.resource_name())
}

fn log_group(ctx: &HandlerContext) -> String {
    ctx.service
        .aws()
        .log_group
        .unwrap_or_else(|| format!("/ecs/{}", ctx.resource_name()))
}

fn secret_id(ctx: &HandlerContext) -> String {
    ctx.service
        .aws()
        .secret_id
        .unwrap_or_else(|| format!("semiont/{}/{}", ctx.env_name(), ctx.service_name))
}

/// Snapshot identifiers allow letters, digits and hyphens only.
fn snapshot_id(prefix: &str, id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("{prefix}-{}", cleaned.trim_matches('-'))
}

fn public_health_url(ctx: &HandlerContext) -> Option<String> {
    let base = ctx.service.url.as_deref()?;
    Some(join_url(base, ctx.requirements.network.health_check_path.as_deref()))
}

// ---------------------------------------------------------------------------
// ECS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EcsService {
    #[serde(default)]
    service_arn: Option<String>,
    service_name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    desired_count: u32,
    #[serde(default)]
    running_count: u32,
    #[serde(default)]
    pending_count: u32,
    #[serde(default)]
    task_definition: Option<String>,
    #[serde(default)]
    deployments: Vec<Value>,
}

impl EcsService {
    fn service_status(&self) -> ServiceStatus {
        if self.status != "ACTIVE" || self.desired_count == 0 {
            ServiceStatus::Stopped
        } else if self.running_count >= self.desired_count && self.deployments.len() <= 1 {
            ServiceStatus::Running
        } else {
            ServiceStatus::Degraded
        }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeServices {
    #[serde(default)]
    services: Vec<EcsService>,
}

#[derive(Debug, Deserialize)]
struct UpdateService {
    service: EcsService,
}

fn ecs_data(ctx: &HandlerContext, cluster: &str, svc: &EcsService) -> ResourceData {
    ResourceData::Ecs {
        cluster: cluster.to_string(),
        service_name: svc.service_name.clone(),
        service_arn: svc.service_arn.clone(),
        task_definition_arn: svc.task_definition.clone(),
        region: region(ctx).unwrap_or_else(|| "default".to_string()),
    }
}

async fn describe_ecs(
    ctx: &HandlerContext,
    cluster: &str,
    service: &str,
) -> Result<Option<EcsService>> {
    let resp: DescribeServices = call(
        ctx,
        &["ecs", "describe-services", "--cluster", cluster, "--services", service],
    )
    .await?;
    Ok(resp.services.into_iter().next())
}

async fn set_desired_count(ctx: &HandlerContext, count: u32) -> Result<(String, EcsService)> {
    let (cluster, service) = ecs_target(ctx);
    let resp: UpdateService = call(
        ctx,
        &[
            "ecs",
            "update-service",
            "--cluster",
            &cluster,
            "--service",
            &service,
            "--desired-count",
            &count.to_string(),
        ],
    )
    .await?;
    tracing::info!(service = %ctx.service_name, %cluster, desired = count, "ecs desired count set");
    Ok((cluster, resp.service))
}

fn ecs_start(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let count = ctx.service.aws().desired_count.max(1);
        let (cluster, svc) = set_desired_count(ctx, count).await?;
        Ok(HandlerOutput::new(ResultDetails::Start {
            endpoint: ctx.service.url.clone(),
            pid: None,
            container_id: None,
            port: None,
            resource_id: svc.service_arn.clone(),
        })
        .with_metadata("desired_count", count)
        .save(ctx.resources(ecs_data(ctx, &cluster, &svc))))
    }
    .boxed()
}

fn ecs_stop(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let (_, svc) = set_desired_count(ctx, 0).await?;
        Ok(HandlerOutput::new(ResultDetails::Stop {
            was_running: svc.running_count > 0,
            graceful: true,
        })
        .with_metadata("draining_tasks", svc.running_count)
        .clear())
    }
    .boxed()
}

fn ecs_check(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let (cluster, service) = ecs_target(ctx);
        let Some(svc) = describe_ecs(ctx, &cluster, &service).await? else {
            return Ok(HandlerOutput::new(ResultDetails::Check {
                status: ServiceStatus::Stopped,
                health: None,
                resources: None,
            })
            .with_metadata("missing", true));
        };

        let mut status = svc.service_status();
        let health = match public_health_url(ctx) {
            Some(url) if status != ServiceStatus::Stopped => {
                Some(health::probe(&url, health::DEFAULT_TIMEOUT).await)
            }
            _ => None,
        };
        if matches!(&health, Some(h) if !h.healthy) && status == ServiceStatus::Running {
            status = ServiceStatus::Degraded;
        }

        let resources = ctx.resources(ecs_data(ctx, &cluster, &svc));
        let mut out = HandlerOutput::new(ResultDetails::Check {
            status,
            health,
            resources: Some(resources.clone()),
        })
        .with_metadata("running_count", svc.running_count)
        .with_metadata("desired_count", svc.desired_count)
        .with_metadata("pending_count", svc.pending_count)
        .with_metadata("deployments", svc.deployments.len());
        if let Some(td) = &svc.task_definition {
            out = out.with_metadata("task_definition", td.as_str());
        }
        Ok(if svc.status == "ACTIVE" {
            out.save(resources)
        } else {
            out.clear()
        })
    }
    .boxed()
}

fn ecs_update(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let previous = match ctx.saved_data() {
            Some(ResourceData::Ecs {
                task_definition_arn,
                ..
            }) => task_definition_arn.clone(),
            _ => None,
        };
        let (cluster, service) = ecs_target(ctx);
        let resp: UpdateService = call(
            ctx,
            &[
                "ecs",
                "update-service",
                "--cluster",
                &cluster,
                "--service",
                &service,
                "--force-new-deployment",
            ],
        )
        .await?;
        Ok(HandlerOutput::new(ResultDetails::Update {
            previous,
            current: resp.service.task_definition.clone(),
        })
        .save(ctx.resources(ecs_data(ctx, &cluster, &resp.service))))
    }
    .boxed()
}

/// Point the matching container (or the only one) at `image` and strip the
/// fields registration refuses.
pub(crate) fn retarget_task_definition(mut td: Value, container: &str, image: &str) -> Result<Value> {
    let obj = td
        .as_object_mut()
        .ok_or_else(|| PlatformError::UnexpectedOutput {
            what: "aws ecs describe-task-definition".into(),
            detail: "taskDefinition is not an object".into(),
        })?;
    for key in READ_ONLY_TASK_KEYS {
        obj.remove(*key);
    }
    let defs = obj
        .get_mut("containerDefinitions")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| PlatformError::UnexpectedOutput {
            what: "aws ecs describe-task-definition".into(),
            detail: "no containerDefinitions".into(),
        })?;

    let only_one = defs.len() == 1;
    let mut replaced = false;
    for def in defs.iter_mut() {
        let matches = only_one || def.get("name").and_then(Value::as_str) == Some(container);
        if let (true, Some(o)) = (matches, def.as_object_mut()) {
            o.insert("image".into(), Value::String(image.to_string()));
            replaced = true;
        }
    }
    if !replaced {
        return Err(PlatformError::Rejected(format!(
            "task definition has no container named '{container}'"
        )));
    }
    Ok(td)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDefinitionEnvelope {
    task_definition: Value,
}

fn ecs_publish(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let env_aws = ctx.environment.aws();
        let account = env_aws
            .account_id
            .clone()
            .ok_or_else(|| PlatformError::MissingRequirement("aws.account_id".into()))?;
        let region = env_aws
            .region
            .clone()
            .ok_or_else(|| PlatformError::MissingRequirement("aws.region".into()))?;
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

        let prefix = if env_aws.ecr_repository_prefix.is_empty() {
            "semiont"
        } else {
            env_aws.ecr_repository_prefix.as_str()
        };
        let registry = format!("{account}.dkr.ecr.{region}.amazonaws.com");
        let tag = match &ctx.options.tag {
            Some(t) => t.clone(),
            None => git_revision(ctx)
                .await
                .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d%H%M%S").to_string()),
        };
        let image = format!("{registry}/{prefix}-{}:{tag}", ctx.service_name);
        let docker = ctx
            .environment
            .container_runtime
            .clone()
            .unwrap_or_else(|| "docker".to_string());

        let password = ctx
            .run_checked(&aws_cmd(ctx, &["ecr", "get-login-password"]))
            .await?;
        ctx.run_checked(
            &ShellCommand::new(&docker)
                .args(["login", "--username", "AWS", "--password-stdin", &registry])
                .stdin(password.stdout.trim().to_string()),
        )
        .await?;
        ctx.run_checked(
            &ShellCommand::new(&docker)
                .args(["build", "-t", &image, "-f"])
                .arg(dockerfile.display().to_string())
                .arg(context.display().to_string())
                .cwd(&ctx.project_root),
        )
        .await?;
        ctx.run_checked(&ShellCommand::new(&docker).args(["push", &image]))
            .await?;
        tracing::info!(service = %ctx.service_name, %image, "image pushed");

        let (cluster, service) = ecs_target(ctx);
        let current = describe_ecs(ctx, &cluster, &service)
            .await?
            .and_then(|s| s.task_definition)
            .ok_or_else(|| {
                PlatformError::Rejected(format!(
                    "ECS service {cluster}/{service} has no task definition to update"
                ))
            })?;
        let described: TaskDefinitionEnvelope = call(
            ctx,
            &["ecs", "describe-task-definition", "--task-definition", &current],
        )
        .await?;
        let container = ctx
            .service
            .aws()
            .service_name
            .unwrap_or_else(|| ctx.service_name.clone());
        let input = retarget_task_definition(described.task_definition, &container, &image)?;
        let registered: TaskDefinitionEnvelope = call(
            ctx,
            &[
                "ecs",
                "register-task-definition",
                "--cli-input-json",
                &input.to_string(),
            ],
        )
        .await?;
        let new_arn = registered
            .task_definition
            .get("taskDefinitionArn")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PlatformError::UnexpectedOutput {
                what: "aws ecs register-task-definition".into(),
                detail: "no taskDefinitionArn".into(),
            })?;

        let resp: UpdateService = call(
            ctx,
            &[
                "ecs",
                "update-service",
                "--cluster",
                &cluster,
                "--service",
                &service,
                "--task-definition",
                &new_arn,
            ],
        )
        .await?;

        Ok(HandlerOutput::new(ResultDetails::Publish {
            artifact: image,
            tag: Some(tag),
            revision: Some(new_arn),
        })
        .with_metadata("previous_task_definition", current)
        .save(ctx.resources(ecs_data(ctx, &cluster, &resp.service))))
    }
    .boxed()
}

fn ecs_logs(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let n = ctx.tail();
        let group = log_group(ctx);
        let out = ctx
            .run_checked(&aws_cmd(
                ctx,
                &["logs", "tail", &group, "--since", "1h", "--format", "short"],
            ))
            .await?;
        Ok(HandlerOutput::new(ResultDetails::Logs {
            entries: tail_entries("cloudwatch", &out.stdout, n),
        })
        .with_metadata("log_group", group))
    }
    .boxed()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTasks {
    #[serde(default)]
    task_arns: Vec<String>,
}

fn ecs_exec(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let line = require_exec_line(ctx)?;
        let (cluster, service) = ecs_target(ctx);
        let tasks: ListTasks = call(
            ctx,
            &[
                "ecs",
                "list-tasks",
                "--cluster",
                &cluster,
                "--service-name",
                &service,
                "--desired-status",
                "RUNNING",
            ],
        )
        .await?;
        let task = tasks.task_arns.into_iter().next().ok_or_else(|| {
            PlatformError::Rejected(format!("no running tasks for {cluster}/{service}"))
        })?;
        let container = ctx
            .service
            .aws()
            .service_name
            .unwrap_or_else(|| ctx.service_name.clone());
        let out = ctx
            .run(&aws_cmd(
                ctx,
                &[
                    "ecs",
                    "execute-command",
                    "--cluster",
                    &cluster,
                    "--task",
                    &task,
                    "--container",
                    &container,
                    "--interactive",
                    "--command",
                    &line,
                ],
            ))
            .await?;
        exec_outcome(line, out).map(|o| o.with_metadata("task", task))
    }
    .boxed()
}

// ---------------------------------------------------------------------------
// CloudFormation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacks {
    #[serde(default)]
    stacks: Vec<Stack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Stack {
    #[serde(default)]
    stack_status: String,
    #[serde(default)]
    outputs: Vec<StackOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackOutput {
    output_key: String,
    output_value: String,
}

fn stack_provision(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let stack = ctx
            .environment
            .aws()
            .stack_name
            .unwrap_or_else(|| format!("semiont-{}", ctx.env_name()));
        let mut created = Vec::new();
        if let Some(template) = ctx.service.aws().template {
            let path = ctx.project_root.join(template);
            ctx.run_checked(&aws_cmd(
                ctx,
                &[
                    "cloudformation",
                    "deploy",
                    "--template-file",
                    &path.display().to_string(),
                    "--stack-name",
                    &stack,
                    "--capabilities",
                    "CAPABILITY_NAMED_IAM",
                    "--no-fail-on-empty-changeset",
                ],
            ))
            .await?;
            created.push(format!("stack {stack}"));
        }

        let resp: DescribeStacks =
            call(ctx, &["cloudformation", "describe-stacks", "--stack-name", &stack]).await?;
        let stack_info = resp.stacks.into_iter().next().ok_or_else(|| {
            PlatformError::Rejected(format!("stack '{stack}' does not exist"))
        })?;
        let outputs: Map<String, Value> = stack_info
            .outputs
            .into_iter()
            .map(|o| (o.output_key, Value::String(o.output_value)))
            .collect();
        Ok(HandlerOutput::new(ResultDetails::Provision { created })
            .with_metadata("stack_status", stack_info.stack_status)
            .with_metadata("outputs", outputs))
    }
    .boxed()
}

// ---------------------------------------------------------------------------
// RDS / Neptune
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Endpoint {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
struct DbInstance {
    #[serde(rename = "DBInstanceIdentifier")]
    identifier: String,
    #[serde(rename = "DBInstanceStatus", default)]
    status: String,
    #[serde(rename = "Endpoint", default)]
    endpoint: Option<Endpoint>,
}

#[derive(Debug, Deserialize)]
struct DbInstanceEnvelope {
    #[serde(rename = "DBInstance")]
    instance: DbInstance,
}

#[derive(Debug, Deserialize)]
struct DescribeDbInstances {
    #[serde(rename = "DBInstances", default)]
    instances: Vec<DbInstance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DbCluster {
    #[serde(rename = "DBClusterIdentifier")]
    identifier: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct DbClusterEnvelope {
    #[serde(rename = "DBCluster")]
    cluster: DbCluster,
}

#[derive(Debug, Deserialize)]
struct DescribeDbClusters {
    #[serde(rename = "DBClusters", default)]
    clusters: Vec<DbCluster>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Snapshot {
    #[serde(alias = "DBSnapshotIdentifier", alias = "DBClusterSnapshotIdentifier")]
    identifier: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    snapshot_create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    #[serde(alias = "DBSnapshot", alias = "DBClusterSnapshot")]
    snapshot: Snapshot,
}

#[derive(Debug, Deserialize)]
struct DescribeSnapshots {
    #[serde(rename = "DBSnapshots", default)]
    snapshots: Vec<Snapshot>,
}

/// RDS and Neptune share their lifecycle vocabulary.
fn db_status(status: &str) -> ServiceStatus {
    match status {
        "available" | "backing-up" | "storage-optimization" => ServiceStatus::Running,
        "stopped" | "stopping" | "deleting" => ServiceStatus::Stopped,
        "starting" | "modifying" | "rebooting" | "creating" | "upgrading" | "maintenance"
        | "configuring-enhanced-monitoring" | "storage-full" | "failed" => ServiceStatus::Degraded,
        _ => ServiceStatus::Unknown,
    }
}

fn rds_data(inst: &DbInstance) -> ResourceData {
    let ep = inst.endpoint.clone().unwrap_or_default();
    ResourceData::Rds {
        instance_identifier: inst.identifier.clone(),
        endpoint: ep.address,
        port: ep.port,
    }
}

fn neptune_data(cluster: &DbCluster) -> ResourceData {
    ResourceData::Neptune {
        cluster_identifier: cluster.identifier.clone(),
        endpoint: cluster.endpoint.clone(),
        port: cluster.port,
    }
}

/// Start/stop calls fail with this code when the resource is already in
/// the requested state.
fn invalid_state(stderr: &str) -> bool {
    stderr.contains("InvalidDBInstanceState") || stderr.contains("InvalidDBClusterStateFault")
}

async fn describe_instance(ctx: &HandlerContext) -> Result<DbInstance> {
    let id = db_instance(ctx);
    let resp: DescribeDbInstances = call(
        ctx,
        &["rds", "describe-db-instances", "--db-instance-identifier", &id],
    )
    .await?;
    resp.instances
        .into_iter()
        .next()
        .ok_or_else(|| PlatformError::Rejected(format!("RDS instance '{id}' not found")))
}

async fn describe_graph(ctx: &HandlerContext) -> Result<DbCluster> {
    let id = graph_cluster(ctx);
    let resp: DescribeDbClusters = call(
        ctx,
        &["neptune", "describe-db-clusters", "--db-cluster-identifier", &id],
    )
    .await?;
    resp.clusters
        .into_iter()
        .next()
        .ok_or_else(|| PlatformError::Rejected(format!("Neptune cluster '{id}' not found")))
}

fn rds_start(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let id = db_instance(ctx);
        let out = ctx
            .run(&aws_json(
                ctx,
                &["rds", "start-db-instance", "--db-instance-identifier", &id],
            ))
            .await?;
        if !out.success() && !invalid_state(&out.stderr) {
            out.clone().checked("aws")?;
        }
        let (inst, already) = if out.success() {
            let env: DbInstanceEnvelope = out.stdout_json("aws rds start-db-instance")?;
            (env.instance, false)
        } else {
            (describe_instance(ctx).await?, true)
        };
        let ep = inst.endpoint.clone().unwrap_or_default();
        Ok(HandlerOutput::new(ResultDetails::Start {
            endpoint: ep.address,
            pid: None,
            container_id: None,
            port: ep.port,
            resource_id: Some(inst.identifier.clone()),
        })
        .with_metadata("db_status", inst.status.as_str())
        .with_metadata("already_running", already)
        .save(ctx.resources(rds_data(&inst))))
    }
    .boxed()
}

fn rds_stop(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let id = db_instance(ctx);
        let out = ctx
            .run(&aws_json(
                ctx,
                &["rds", "stop-db-instance", "--db-instance-identifier", &id],
            ))
            .await?;
        if !out.success() && !invalid_state(&out.stderr) {
            out.clone().checked("aws")?;
        }
        let was_running = out.success();
        Ok(HandlerOutput::new(ResultDetails::Stop {
            was_running,
            graceful: true,
        })
        .clear())
    }
    .boxed()
}

fn rds_check(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let inst = describe_instance(ctx).await?;
        let resources = ctx.resources(rds_data(&inst));
        Ok(HandlerOutput::new(ResultDetails::Check {
            status: db_status(&inst.status),
            health: None,
            resources: Some(resources.clone()),
        })
        .with_metadata("db_status", inst.status.as_str())
        .save(resources))
    }
    .boxed()
}

async fn create_db_snapshot(ctx: &HandlerContext, id: &str) -> Result<Snapshot> {
    let instance = db_instance(ctx);
    let snap = snapshot_id(&instance, id);
    let resp: SnapshotEnvelope = call(
        ctx,
        &[
            "rds",
            "create-db-snapshot",
            "--db-instance-identifier",
            &instance,
            "--db-snapshot-identifier",
            &snap,
        ],
    )
    .await?;
    Ok(resp.snapshot)
}

fn rds_backup(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let snap = create_db_snapshot(ctx, &ctx.new_backup_id()?).await?;
        Ok(HandlerOutput::new(ResultDetails::Backup {
            location: format!("rds:{}/{}", db_instance(ctx), snap.identifier),
            backup_id: snap.identifier,
            size_bytes: None,
        })
        .with_metadata("snapshot_status", snap.status))
    }
    .boxed()
}

fn rds_restore(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let instance = db_instance(ctx);
        let snapshot = match &ctx.options.backup_id {
            Some(id) => id.clone(),
            None => {
                let resp: DescribeSnapshots = call(
                    ctx,
                    &["rds", "describe-db-snapshots", "--db-instance-identifier", &instance],
                )
                .await?;
                resp.snapshots
                    .into_iter()
                    .max_by(|a, b| a.snapshot_create_time.cmp(&b.snapshot_create_time))
                    .map(|s| s.identifier)
                    .ok_or_else(|| {
                        PlatformError::Rejected(format!("no snapshots for RDS instance '{instance}'"))
                    })?
            }
        };

        let pre_restore_backup = if ctx.options.pre_restore_backup {
            Some(create_db_snapshot(ctx, &ctx.pre_restore_id()).await?.identifier)
        } else {
            None
        };

        // RDS restores into a new instance; the original is left untouched.
        let target = snapshot_id(
            &format!("{instance}-restored"),
            &chrono::Utc::now().format("%Y%m%d%H%M%S").to_string(),
        );
        let resp: DbInstanceEnvelope = call(
            ctx,
            &[
                "rds",
                "restore-db-instance-from-db-snapshot",
                "--db-instance-identifier",
                &target,
                "--db-snapshot-identifier",
                &snapshot,
            ],
        )
        .await?;
        Ok(HandlerOutput::new(ResultDetails::Restore {
            backup_id: snapshot,
            pre_restore_backup,
        })
        .with_metadata("restored_instance", resp.instance.identifier))
    }
    .boxed()
}

fn neptune_start(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let id = graph_cluster(ctx);
        let out = ctx
            .run(&aws_json(
                ctx,
                &["neptune", "start-db-cluster", "--db-cluster-identifier", &id],
            ))
            .await?;
        if !out.success() && !invalid_state(&out.stderr) {
            out.clone().checked("aws")?;
        }
        let cluster = if out.success() {
            out.stdout_json::<DbClusterEnvelope>("aws neptune start-db-cluster")?
                .cluster
        } else {
            describe_graph(ctx).await?
        };
        Ok(HandlerOutput::new(ResultDetails::Start {
            endpoint: cluster.endpoint.clone(),
            pid: None,
            container_id: None,
            port: cluster.port,
            resource_id: Some(cluster.identifier.clone()),
        })
        .with_metadata("cluster_status", cluster.status.as_str())
        .save(ctx.resources(neptune_data(&cluster))))
    }
    .boxed()
}

fn neptune_stop(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let id = graph_cluster(ctx);
        let out = ctx
            .run(&aws_json(
                ctx,
                &["neptune", "stop-db-cluster", "--db-cluster-identifier", &id],
            ))
            .await?;
        if !out.success() && !invalid_state(&out.stderr) {
            out.clone().checked("aws")?;
        }
        let was_running = out.success();
        Ok(HandlerOutput::new(ResultDetails::Stop {
            was_running,
            graceful: true,
        })
        .clear())
    }
    .boxed()
}

fn neptune_check(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let cluster = describe_graph(ctx).await?;
        let resources = ctx.resources(neptune_data(&cluster));
        Ok(HandlerOutput::new(ResultDetails::Check {
            status: db_status(&cluster.status),
            health: None,
            resources: Some(resources.clone()),
        })
        .with_metadata("cluster_status", cluster.status.as_str())
        .save(resources))
    }
    .boxed()
}

fn neptune_backup(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let cluster = graph_cluster(ctx);
        let snap = snapshot_id(&cluster, &ctx.new_backup_id()?);
        let resp: SnapshotEnvelope = call(
            ctx,
            &[
                "neptune",
                "create-db-cluster-snapshot",
                "--db-cluster-identifier",
                &cluster,
                "--db-cluster-snapshot-identifier",
                &snap,
            ],
        )
        .await?;
        Ok(HandlerOutput::new(ResultDetails::Backup {
            location: format!("neptune:{cluster}/{}", resp.snapshot.identifier),
            backup_id: resp.snapshot.identifier,
            size_bytes: None,
        })
        .with_metadata("snapshot_status", resp.snapshot.status))
    }
    .boxed()
}

// ---------------------------------------------------------------------------
// EFS
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeFileSystems {
    #[serde(default)]
    file_systems: Vec<FileSystem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileSystem {
    file_system_id: String,
    #[serde(default)]
    life_cycle_state: String,
    #[serde(default)]
    size_in_bytes: Option<FileSystemSize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileSystemSize {
    value: u64,
}

fn efs_check(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let id = ctx.service.aws().file_system_id.ok_or_else(|| {
            PlatformError::MissingRequirement(format!(
                "`aws.file_system_id` for service '{}'",
                ctx.service_name
            ))
        })?;
        let resp: DescribeFileSystems =
            call(ctx, &["efs", "describe-file-systems", "--file-system-id", &id]).await?;
        let Some(fs) = resp.file_systems.into_iter().next() else {
            return Ok(HandlerOutput::new(ResultDetails::Check {
                status: ServiceStatus::Stopped,
                health: None,
                resources: None,
            })
            .clear());
        };
        let status = match fs.life_cycle_state.as_str() {
            "available" => ServiceStatus::Running,
            "creating" | "updating" => ServiceStatus::Degraded,
            "deleting" | "deleted" => ServiceStatus::Stopped,
            _ => ServiceStatus::Unknown,
        };
        let resources = ctx.resources(ResourceData::Efs {
            file_system_id: fs.file_system_id,
        });
        let mut out = HandlerOutput::new(ResultDetails::Check {
            status,
            health: None,
            resources: Some(resources.clone()),
        })
        .with_metadata("life_cycle_state", fs.life_cycle_state);
        if let Some(size) = fs.size_in_bytes {
            out = out.with_metadata("size_bytes", size.value);
        }
        Ok(out.save(resources))
    }
    .boxed()
}

// ---------------------------------------------------------------------------
// Secrets Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecretValue {
    #[serde(default)]
    secret_string: Option<String>,
}

/// The secret's JSON map, or `None` when the secret does not exist yet.
async fn read_secret(ctx: &HandlerContext, id: &str) -> Result<Option<Map<String, Value>>> {
    let out = ctx
        .run(&aws_json(
            ctx,
            &["secretsmanager", "get-secret-value", "--secret-id", id],
        ))
        .await?;
    if out.stderr.contains("ResourceNotFoundException") {
        return Ok(None);
    }
    let out = out.checked("aws")?;
    let value: SecretValue = out.stdout_json("aws secretsmanager get-secret-value")?;
    match value.secret_string {
        None => Ok(Some(Map::new())),
        Some(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|source| PlatformError::Parse {
                what: format!("secret '{id}' (expected a JSON object)"),
                source,
            }),
    }
}

async fn write_secret(
    ctx: &HandlerContext,
    id: &str,
    map: &Map<String, Value>,
    exists: bool,
) -> Result<()> {
    let body = Value::Object(map.clone()).to_string();
    let args = if exists {
        ["secretsmanager", "put-secret-value", "--secret-id", id, "--secret-string", &body]
    } else {
        ["secretsmanager", "create-secret", "--name", id, "--secret-string", &body]
    };
    ctx.run_checked(&aws_json(ctx, &args)).await?;
    Ok(())
}

fn secret(ctx: &HandlerContext) -> BoxFuture<'_, Result<HandlerOutput>> {
    async move {
        let action = ctx
            .options
            .secret
            .clone()
            .ok_or_else(|| PlatformError::MissingRequirement("a secret action".into()))?;
        let id = secret_id(ctx);
        let existing = read_secret(ctx, &id).await?;
        let exists = existing.is_some();
        let mut map = existing.unwrap_or_default();

        let (value, keys) = match &action {
            SecretAction::Get { key } => {
                let v = map.get(key).ok_or_else(|| {
                    PlatformError::Rejected(format!("secret '{key}' not found in {id}"))
                })?;
                let text = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                (Some(text), Vec::new())
            }
            SecretAction::Set { key, value } => {
                map.insert(key.clone(), Value::String(value.clone()));
                write_secret(ctx, &id, &map, exists).await?;
                (None, Vec::new())
            }
            SecretAction::Delete { key } => {
                if map.remove(key).is_none() {
                    return Err(PlatformError::Rejected(format!("secret '{key}' not found in {id}")));
                }
                write_secret(ctx, &id, &map, exists).await?;
                (None, Vec::new())
            }
            SecretAction::List => {
                let mut keys: Vec<String> = map.keys().cloned().collect();
                keys.sort();
                (None, keys)
            }
        };

        Ok(HandlerOutput::new(ResultDetails::Secret {
            action: action.name().to_string(),
            key: action.key().map(str::to_string),
            value,
            keys,
        })
        .with_metadata("secret_id", id))
    }
    .boxed()
}
