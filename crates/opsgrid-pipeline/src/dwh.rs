//! Daily data-warehouse export.

use std::collections::BTreeMap;

use opsgrid_cloud::compute::{FunctionSpec, InvokePermission, RuleTarget};
use opsgrid_cloud::{CloudClients, PollPolicy};
use opsgrid_core::{OpsConfig, naming};
use opsgrid_state::Deployment;

use crate::error::{PipelineError, PipelineResult};
use crate::function::FunctionDeployer;
use crate::role::{LAMBDA_PRINCIPAL, RoleProvisioner};
use crate::step::StepRunner;
use crate::{FUNCTION_RUNTIME, deployment_bucket, function_code};

const PACKAGE: &str = "dwh-export";
const EXPORT_MEMORY_MB: u32 = 512;
const EXPORT_TIMEOUT_SECS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DwhResources {
    pub function_arn: String,
    pub rule_arn: String,
}

pub struct DwhPipeline {
    clients: CloudClients,
    functions: FunctionDeployer,
    roles: RoleProvisioner,
    role_name: String,
    warehouse_key: Option<String>,
}

impl DwhPipeline {
    /// `warehouse_key` is the base64 service-account key of the warehouse.
    pub fn new(clients: CloudClients, ops: &OpsConfig, warehouse_key: Option<String>) -> Self {
        Self {
            functions: FunctionDeployer::new(&clients, PollPolicy::from(ops.poll.function_update)),
            roles: RoleProvisioner::new(&clients, ops.platform.permissions_boundary.clone()),
            clients,
            role_name: ops.roles.dwh_export.clone(),
            warehouse_key,
        }
    }

    pub async fn provision(&self, deployment: &Deployment) -> PipelineResult<DwhResources> {
        let key = self
            .warehouse_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(PipelineError::MissingWarehouseKey)?;
        let prefix = deployment.name.as_str();
        let mut run = StepRunner::new("dwh", prefix);

        let role_arn = run
            .step("role", async {
                Ok(self
                    .roles
                    .ensure_role(&self.role_name, LAMBDA_PRINCIPAL, &["AWSLambdaExecute", "AmazonS3ReadOnlyAccess"])
                    .await?)
            })
            .await?;

        let rule_name = naming::dwh_trigger_rule(prefix);
        let rule_arn = run
            .step("trigger-rule", async {
                Ok(self.clients.rules.put_rule(&rule_name, naming::DWH_SCHEDULE).await?)
            })
            .await?;

        let function_name = naming::dwh_export_function(prefix);
        let spec = FunctionSpec {
            name: function_name.clone(),
            role_arn,
            handler: "index.handler".to_string(),
            runtime: FUNCTION_RUNTIME.to_string(),
            timeout_secs: EXPORT_TIMEOUT_SECS,
            memory_mb: EXPORT_MEMORY_MB,
            environment: BTreeMap::from([
                ("AWS_S3_BUCKET".to_string(), deployment_bucket(deployment)),
                ("DEPLOYMENT_ID".to_string(), deployment.name.clone()),
                ("FUSEBIT_GC_BQ_KEY_BASE64".to_string(), key.to_string()),
            ]),
            code: function_code(deployment, PACKAGE),
            vpc: None,
        };
        let function_arn = run
            .step("exporter", async { self.functions.create_or_update(&spec).await })
            .await?
            .arn;

        let permission = InvokePermission {
            function_name: function_name.clone(),
            statement_id: function_name,
            principal: "events.amazonaws.com".to_string(),
            source_arn: Some(rule_arn.clone()),
        };
        run.step("permission", self.functions.grant(&permission)).await?;

        let target = RuleTarget {
            id: rule_name.clone(),
            arn: function_arn.clone(),
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
        Ok(DwhResources {
            function_arn,
            rule_arn,
        })
    }
}
