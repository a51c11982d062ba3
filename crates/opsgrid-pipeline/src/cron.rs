//! Scheduled-job pipeline.
//!
//! A scheduler function fires every ten minutes, decides which jobs are
//! due, and enqueues them. An executor function drains the queue. Messages
//! that fail `max_receive_count` times land in the dead-letter queue.

use std::collections::BTreeMap;

use opsgrid_cloud::compute::{FunctionSpec, InvokePermission, RuleTarget};
use opsgrid_cloud::messaging::{QueueAttributes, RedrivePolicy};
use opsgrid_cloud::{CloudClients, CloudError, PollPolicy, Provisioned};
use opsgrid_core::config::{CronConfig, RolesConfig};
use opsgrid_core::{OpsConfig, naming};
use opsgrid_state::Deployment;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::function::FunctionDeployer;
use crate::role::{LAMBDA_PRINCIPAL, RoleProvisioner};
use crate::step::StepRunner;
use crate::{FUNCTION_RUNTIME, deployment_bucket, function_code};

const PACKAGE: &str = "cron";
const SCHEDULER_TIMEOUT_SECS: u32 = 120;
const SCHEDULER_MEMORY_MB: u32 = 128;
const EVENTS_PRINCIPAL: &str = "events.amazonaws.com";

/// What a successful cron deployment produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronResources {
    pub queue_url: String,
    pub queue_arn: String,
    pub dead_letter_url: String,
    pub dead_letter_arn: String,
    pub executor_arn: String,
    pub scheduler_arn: String,
    pub rule_arn: String,
}

pub struct CronPipeline {
    clients: CloudClients,
    functions: FunctionDeployer,
    roles: RoleProvisioner,
    cron: CronConfig,
    role_names: RolesConfig,
}

impl CronPipeline {
    pub fn new(clients: CloudClients, ops: &OpsConfig) -> Self {
        Self {
            functions: FunctionDeployer::new(&clients, PollPolicy::from(ops.poll.function_update)),
            roles: RoleProvisioner::new(&clients, ops.platform.permissions_boundary.clone()),
            clients,
            cron: ops.cron.clone(),
            role_names: ops.roles.clone(),
        }
    }

    pub async fn provision(&self, deployment: &Deployment) -> PipelineResult<CronResources> {
        let prefix = deployment.name.as_str();
        let bucket = deployment_bucket(deployment);
        let mut run = StepRunner::new("cron", prefix);

        let executor_role = run
            .step("executor-role", async {
                Ok(self
                    .roles
                    .ensure_role(&self.role_names.cron_executor, LAMBDA_PRINCIPAL, &["AWSLambdaExecute", "AmazonSQSFullAccess"])
                    .await?)
            })
            .await?;
        let scheduler_role = run
            .step("scheduler-role", async {
                Ok(self
                    .roles
                    .ensure_role(&self.role_names.cron_scheduler, LAMBDA_PRINCIPAL, &["AWSLambdaExecute", "AmazonSQSFullAccess"])
                    .await?)
            })
            .await?;

        let dlq_name = naming::cron_dead_letter_queue(prefix);
        let dead_letter_url = run
            .step("dead-letter-queue", async {
                Ok(self.ensure_queue(&dlq_name, &QueueAttributes::default(), false).await?)
            })
            .await?;
        let dead_letter_arn = run
            .step("dead-letter-arn", async {
                Ok(self.clients.queues.get_queue_arn(&dead_letter_url).await?)
            })
            .await?;

        let attributes = QueueAttributes {
            visibility_timeout_secs: Some(6 * self.cron.executor_timeout_secs),
            redrive: Some(RedrivePolicy {
                max_receive_count: self.cron.max_receive_count,
                dead_letter_target_arn: dead_letter_arn.clone(),
            }),
        };
        let queue_name = naming::cron_queue(prefix);
        let queue_url = run
            .step("queue", async { Ok(self.ensure_queue(&queue_name, &attributes, true).await?) })
            .await?;
        let queue_arn = run
            .step("queue-arn", async {
                Ok(self.clients.queues.get_queue_arn(&queue_url).await?)
            })
            .await?;

        let executor_name = naming::cron_executor(prefix);
        let executor = FunctionSpec {
            name: executor_name.clone(),
            role_arn: executor_role,
            handler: "index.executor".to_string(),
            runtime: FUNCTION_RUNTIME.to_string(),
            timeout_secs: self.cron.executor_timeout_secs,
            memory_mb: self.cron.executor_memory_mb,
            environment: BTreeMap::from([
                ("AWS_S3_BUCKET".to_string(), bucket.clone()),
                (
                    "CRON_CONCURRENT_EXECUTION_LIMIT".to_string(),
                    self.cron.concurrent_execution_limit.to_string(),
                ),
            ]),
            code: function_code(deployment, PACKAGE),
            vpc: None,
        };
        let executor_arn = run
            .step("executor", async { self.functions.create_or_update(&executor).await })
            .await?
            .arn;
        run.step("executor-mapping", self.connect_queue(&executor_name, &queue_arn))
            .await?;

        let rule_name = naming::cron_trigger_rule(prefix);
        let rule_arn = run
            .step("trigger-rule", async {
                Ok(self
                    .clients
                    .rules
                    .put_rule(&rule_name, naming::CRON_SCHEDULE)
                    .await?)
            })
            .await?;

        let scheduler_name = naming::cron_scheduler(prefix);
        let scheduler = FunctionSpec {
            name: scheduler_name.clone(),
            role_arn: scheduler_role,
            handler: "index.scheduler".to_string(),
            runtime: FUNCTION_RUNTIME.to_string(),
            timeout_secs: SCHEDULER_TIMEOUT_SECS,
            memory_mb: SCHEDULER_MEMORY_MB,
            environment: BTreeMap::from([
                ("CRON_FILTER".to_string(), self.cron.filter.clone()),
                (
                    "CRON_MAX_EXECUTIONS_PER_WINDOW".to_string(),
                    self.cron.max_executions_per_window.to_string(),
                ),
                ("AWS_S3_BUCKET".to_string(), bucket),
                ("CRON_QUEUE_URL".to_string(), queue_url.clone()),
            ]),
            code: function_code(deployment, PACKAGE),
            vpc: None,
        };
        let scheduler_arn = run
            .step("scheduler", async { self.functions.create_or_update(&scheduler).await })
            .await?
            .arn;

        let permission = InvokePermission {
            function_name: scheduler_name.clone(),
            statement_id: scheduler_name,
            principal: EVENTS_PRINCIPAL.to_string(),
            source_arn: Some(rule_arn.clone()),
        };
        run.step("scheduler-permission", self.functions.grant(&permission))
            .await?;

        let target = RuleTarget {
            id: rule_name.clone(),
            arn: scheduler_arn.clone(),
        };
        run.step("trigger-target", async {
            let failed = self.clients.rules.put_targets(&rule_name, &[target]).await?;
            if failed > 0 {
                return Err(PipelineError::TargetsFailed {
                    rule: rule_name.clone(),
                    failed,
                });
            }
            Ok(())
        })
        .await?;

        run.finish();
        Ok(CronResources {
            queue_url,
            queue_arn,
            dead_letter_url,
            dead_letter_arn,
            executor_arn,
            scheduler_arn,
            rule_arn,
        })
    }

    /// Create a queue, or look up the existing one and optionally re-apply
    /// its attributes. Returns the queue URL.
    async fn ensure_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
        reapply: bool,
    ) -> Result<String, CloudError> {
        if let Provisioned::Created(url) = self.clients.queues.create_queue(name, attributes).await? {
            info!(queue = name, "queue created");
            return Ok(url);
        }
        let url = self
            .clients
            .queues
            .get_queue_url(name)
            .await?
            .ok_or_else(|| CloudError::unexpected("queues", format!("queue {name} exists but has no url")))?;
        if reapply {
            debug!(queue = name, "queue exists, re-applying attributes");
            self.clients.queues.set_queue_attributes(&url, attributes).await?;
        }
        Ok(url)
    }

    /// Point the executor at the queue, dropping mappings to any other source.
    async fn connect_queue(&self, function: &str, queue_arn: &str) -> PipelineResult<()> {
        let functions = self.functions.service();
        for stale in functions
            .list_event_source_mappings(function)
            .await?
            .into_iter()
            .filter(|m| m.event_source_arn != queue_arn)
        {
            info!(function, source = %stale.event_source_arn, "removing stale event source mapping");
            functions.delete_event_source_mapping(&stale.uuid).await?;
        }
        functions
            .create_event_source_mapping(function, queue_arn, self.cron.batch_size)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{clients, deployment};
    use opsgrid_cloud::ProviderErrorKind;
    use opsgrid_cloud::sim::SimulatedCloud;
    use opsgrid_core::ErrorKind;

    #[tokio::test]
    async fn fresh_deployment_wires_the_whole_chain() {
        let cloud = SimulatedCloud::new();
        let pipeline = CronPipeline::new(clients(&cloud), &OpsConfig::for_testing());
        let out = pipeline.provision(&deployment()).await.unwrap();

        assert_eq!(out.queue_url, "https://sqs.us-west-2.amazonaws.com/123456789012/d1-cron");
        let attrs = cloud.queue_attributes("d1-cron").unwrap();
        assert_eq!(attrs.visibility_timeout_secs, Some(360));
        assert_eq!(
            attrs.redrive.unwrap().to_json(),
            format!(r#"{{"maxReceiveCount":"5","deadLetterTargetArn":"{}"}}"#, out.dead_letter_arn)
        );
        assert!(cloud.queue_attributes("d1-cron-dead-letter").is_some());

        let mappings = cloud.event_source_mappings("d1-cron-executor");
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].event_source_arn, out.queue_arn);
        assert_eq!(mappings[0].batch_size, 10);

        let scheduler = cloud.function("d1-cron-scheduler").unwrap();
        assert_eq!(scheduler.environment["CRON_QUEUE_URL"], out.queue_url);
        assert_eq!(scheduler.environment["AWS_S3_BUCKET"], "fusebit-d1-us-west-2");
        let executor = cloud.function("d1-cron-executor").unwrap();
        assert_eq!(executor.environment["CRON_CONCURRENT_EXECUTION_LIMIT"], "10");

        let (schedule, targets) = cloud.rule("d1-cron-scheduler-trigger").unwrap();
        assert_eq!(schedule, naming::CRON_SCHEDULE);
        assert_eq!(targets, vec![RuleTarget {
            id: "d1-cron-scheduler-trigger".to_string(),
            arn: out.scheduler_arn.clone(),
        }]);

        let permissions = cloud.permissions("d1-cron-scheduler");
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].principal, "events.amazonaws.com");
        assert_eq!(permissions[0].source_arn.as_deref(), Some(out.rule_arn.as_str()));
    }

    #[tokio::test]
    async fn rerun_converges_and_drops_stale_mappings() {
        let cloud = SimulatedCloud::new();
        let pipeline = CronPipeline::new(clients(&cloud), &OpsConfig::for_testing());
        let first = pipeline.provision(&deployment()).await.unwrap();
        cloud.seed_event_source_mapping("d1-cron-executor", "arn:aws:sqs:us-west-2:123456789012:old-cron");

        let second = pipeline.provision(&deployment()).await.unwrap();
        assert_eq!(first, second);
        let mappings = cloud.event_source_mappings("d1-cron-executor");
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].event_source_arn, second.queue_arn);
        assert_eq!(cloud.call_count("queues.set_queue_attributes"), 1);
        assert_eq!(cloud.call_count("functions.update_function_code"), 2);
    }

    #[tokio::test]
    async fn failure_names_the_step() {
        let cloud = SimulatedCloud::new();
        cloud.fail("queues.create_queue:d1-cron", ProviderErrorKind::Other);
        let pipeline = CronPipeline::new(clients(&cloud), &OpsConfig::for_testing());

        let err = pipeline.provision(&deployment()).await.unwrap_err();
        assert_eq!(err.step(), Some("queue"));
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(cloud.function("d1-cron-executor").is_none());
    }
}
