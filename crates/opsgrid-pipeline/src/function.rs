//! Create-or-update for managed functions.
//!
//! A function that already exists is updated in two calls: code first,
//! then configuration. The provider rejects a configuration update while
//! the code update is still converging, so the deployer polls the last
//! update status in between (and after) with a bounded budget.

use std::sync::Arc;

use opsgrid_cloud::compute::{FunctionInfo, FunctionService, FunctionSpec, InvokePermission, UpdateStatus};
use opsgrid_cloud::{CloudClients, CloudError, PollPolicy, PollState, Provisioned, poll_until};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

pub struct FunctionDeployer {
    functions: Arc<dyn FunctionService>,
    poll: PollPolicy,
}

impl FunctionDeployer {
    pub fn new(clients: &CloudClients, poll: PollPolicy) -> Self {
        Self {
            functions: clients.functions.clone(),
            poll,
        }
    }

    pub fn service(&self) -> &dyn FunctionService {
        self.functions.as_ref()
    }

    pub async fn create_or_update(&self, spec: &FunctionSpec) -> PipelineResult<FunctionInfo> {
        if let Provisioned::Created(info) = self.functions.create_function(spec).await? {
            debug!(function = %spec.name, "function created");
            return Ok(info);
        }

        debug!(function = %spec.name, "function exists, updating");
        self.functions
            .update_function_code(&spec.name, &spec.code)
            .await?;
        self.wait_until_updated(&spec.name).await?;
        self.functions.update_function_configuration(spec).await?;
        self.wait_until_updated(&spec.name).await?;

        self.functions
            .get_function(&spec.name)
            .await?
            .ok_or_else(|| {
                CloudError::unexpected("functions", format!("{} vanished after update", spec.name)).into()
            })
    }

    async fn wait_until_updated(&self, name: &str) -> PipelineResult<()> {
        let functions = &self.functions;
        let status = poll_until(&self.poll, &format!("update of function {name}"), |_| async move {
            Ok(match functions.last_update_status(name).await? {
                UpdateStatus::InProgress => PollState::Pending,
                settled => PollState::Ready(settled),
            })
        })
        .await?;
        match status {
            UpdateStatus::Failed(reason) => Err(PipelineError::FunctionUpdateFailed {
                name: name.to_string(),
                reason,
            }),
            _ => Ok(()),
        }
    }

    /// Add an invoke permission; an existing statement counts as success.
    pub async fn grant(&self, permission: &InvokePermission) -> PipelineResult<()> {
        if let Provisioned::AlreadyExists = self.functions.add_permission(permission).await? {
            debug!(function = %permission.function_name, statement = %permission.statement_id, "permission already present");
        }
        Ok(())
    }
}
