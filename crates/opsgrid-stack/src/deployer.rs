//! Stack deployment.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use opsgrid_cloud::compute::AutoScalingGroupSpec;
use opsgrid_cloud::{CloudClients, Provisioned};
use opsgrid_core::config::{RolesConfig, StackConfig};
use opsgrid_core::{OpsConfig, naming};
use opsgrid_pipeline::deployment_bucket;
use opsgrid_pipeline::role::RoleProvisioner;
use opsgrid_routing::{LoadBalancerProvisioner, TargetRegistration};
use opsgrid_state::{Deployment, DeploymentRepository, Network, NetworkLookup, Stack, StackRepository};
use tracing::{info, warn};

use crate::error::{StackError, StackResult};
use crate::user_data::{UserData, platform_environment};

const INSTANCE_POLICIES: &[&str] = &[
    "CloudWatchAgentServerPolicy",
    "AmazonEC2ContainerRegistryReadOnly",
    "AmazonSSMManagedInstanceCore",
];

/// A request to launch a new stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    pub deployment_name: String,
    pub region: String,
    pub image_tag: String,
    /// Falls back to the deployment's size.
    pub size: Option<u32>,
    pub disable_health_check: bool,
    /// Extra variables appended to the platform environment file.
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedStack {
    pub stack: Stack,
    pub target: TargetRegistration,
}

/// A stack record and whether it serves the deployment's main hostname.
///
/// `active` is read from the autoscaling group's attachments, never
/// stored: stack records are write-once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackStatus {
    pub stack: Stack,
    pub active: bool,
}

/// Smallest non-negative id not in `used`.
pub fn next_stack_id(used: impl IntoIterator<Item = u32>) -> u32 {
    let used: BTreeSet<u32> = used.into_iter().collect();
    let mut next = 0;
    while used.contains(&next) {
        next += 1;
    }
    next
}

pub struct StackDeployer {
    clients: CloudClients,
    deployments: Arc<dyn DeploymentRepository>,
    networks: Arc<dyn NetworkLookup>,
    stacks: Arc<dyn StackRepository>,
    routing: Arc<LoadBalancerProvisioner>,
    roles: RoleProvisioner,
    config: StackConfig,
    role_names: RolesConfig,
}

impl StackDeployer {
    pub fn new(
        clients: CloudClients,
        deployments: Arc<dyn DeploymentRepository>,
        networks: Arc<dyn NetworkLookup>,
        stacks: Arc<dyn StackRepository>,
        routing: Arc<LoadBalancerProvisioner>,
        ops: &OpsConfig,
    ) -> Self {
        Self {
            roles: RoleProvisioner::new(&clients, ops.platform.permissions_boundary.clone()),
            clients,
            deployments,
            networks,
            stacks,
            routing,
            config: ops.stack.clone(),
            role_names: ops.roles.clone(),
        }
    }

    pub async fn deploy(&self, request: &StackRequest) -> StackResult<DeployedStack> {
        let deployment = self.deployment(&request.deployment_name, &request.region).await?;
        let network = self
            .networks
            .get(&deployment.network_name, &deployment.region)
            .await?
            .ok_or_else(|| StackError::NetworkNotFound {
                name: deployment.network_name.clone(),
                region: deployment.region.clone(),
            })?;

        let size = request.size.unwrap_or(deployment.size);
        if size == 0 {
            return Err(StackError::InvalidSize);
        }
        let existing = self.stacks.list(&deployment.name, &deployment.region).await?;
        let id = next_stack_id(existing.iter().map(|s| s.id));

        let image_id = self
            .clients
            .images
            .find_image(&self.config.os_version)
            .await?
            .ok_or_else(|| StackError::ImageNotFound(self.config.os_version.clone()))?;

        self.roles
            .ensure_instance_profile(&self.config.instance_profile, &self.role_names.instance, INSTANCE_POLICIES)
            .await?;

        let group = naming::auto_scaling_group(&deployment.name, id);
        let spec = self.group_spec(&deployment, &network, request, id, image_id, size);
        if let Provisioned::AlreadyExists = self.clients.autoscaling.create_group(&spec).await? {
            // Left behind by an attempt that failed before its record was written.
            warn!(deployment = %deployment.name, group = %group, "autoscaling group already exists, reusing it");
        }

        let target = self
            .routing
            .add_target_group(&deployment, id, request.disable_health_check)
            .await?;
        self.clients
            .autoscaling
            .attach_target_groups(&group, std::slice::from_ref(&target.target_group_arn))
            .await?;

        let stack = Stack {
            deployment_name: deployment.name.clone(),
            region: deployment.region.clone(),
            id,
            image_tag: request.image_tag.clone(),
            size,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        };
        self.stacks.add(&stack).await?;

        info!(
            deployment = %deployment.name,
            stack = id,
            tag = %request.image_tag,
            size,
            host = %target.host_name,
            "stack deployed"
        );
        Ok(DeployedStack { stack, target })
    }

    pub async fn get(&self, name: &str, region: &str, id: u32) -> StackResult<StackStatus> {
        let deployment = self.deployment(name, region).await?;
        let stack = self.stack(&deployment, id).await?;
        let default_target = self.routing.target_group_arn(&deployment, None).await?;
        let active = self.is_active(&deployment, id, &default_target).await?;
        Ok(StackStatus { stack, active })
    }

    /// Every stack of a deployment, ordered by id.
    pub async fn list(&self, name: &str, region: &str) -> StackResult<Vec<StackStatus>> {
        let deployment = self.deployment(name, region).await?;
        let default_target = self.routing.target_group_arn(&deployment, None).await?;
        let mut statuses = Vec::new();
        for stack in self.stacks.list(&deployment.name, &deployment.region).await? {
            let active = self.is_active(&deployment, stack.id, &default_target).await?;
            statuses.push(StackStatus { stack, active });
        }
        Ok(statuses)
    }

    /// Route the deployment's main hostname to this stack, alongside any
    /// stack already serving it.
    pub async fn promote(&self, name: &str, region: &str, id: u32) -> StackResult<StackStatus> {
        let deployment = self.deployment(name, region).await?;
        let stack = self.stack(&deployment, id).await?;
        let default_target = self.routing.target_group_arn(&deployment, None).await?;
        let group = naming::auto_scaling_group(&deployment.name, id);
        self.clients
            .autoscaling
            .attach_target_groups(&group, std::slice::from_ref(&default_target))
            .await?;
        info!(deployment = %deployment.name, region = %deployment.region, stack = id, "stack promoted");
        Ok(StackStatus { stack, active: true })
    }

    /// Stop routing the main hostname to this stack. Without `force`, the
    /// last active stack cannot be demoted.
    pub async fn demote(&self, name: &str, region: &str, id: u32, force: bool) -> StackResult<StackStatus> {
        let deployment = self.deployment(name, region).await?;
        let stack = self.stack(&deployment, id).await?;
        let default_target = self.routing.target_group_arn(&deployment, None).await?;

        if !force {
            let mut active = Vec::new();
            for other in self.stacks.list(&deployment.name, &deployment.region).await? {
                if self.is_active(&deployment, other.id, &default_target).await? {
                    active.push(other.id);
                }
            }
            if active == [id] {
                return Err(StackError::DemoteLastStack {
                    deployment: deployment.name.clone(),
                    id,
                });
            }
        }

        let group = naming::auto_scaling_group(&deployment.name, id);
        self.clients
            .autoscaling
            .detach_target_groups(&group, std::slice::from_ref(&default_target))
            .await?;
        info!(deployment = %deployment.name, region = %deployment.region, stack = id, force, "stack demoted");
        Ok(StackStatus { stack, active: false })
    }

    // ── Helpers ────────────────────────────────────────────────────

    async fn deployment(&self, name: &str, region: &str) -> StackResult<Deployment> {
        self.deployments
            .get(name, region)
            .await?
            .ok_or_else(|| StackError::DeploymentNotFound {
                name: name.to_string(),
                region: region.to_string(),
            })
    }

    async fn stack(&self, deployment: &Deployment, id: u32) -> StackResult<Stack> {
        self.stacks
            .list(&deployment.name, &deployment.region)
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| StackError::StackNotFound {
                deployment: deployment.name.clone(),
                region: deployment.region.clone(),
                id,
            })
    }

    /// A group that no longer exists serves nothing.
    async fn is_active(&self, deployment: &Deployment, id: u32, default_target: &str) -> StackResult<bool> {
        let group = naming::auto_scaling_group(&deployment.name, id);
        Ok(self
            .clients
            .autoscaling
            .describe_group(&group)
            .await?
            .is_some_and(|info| info.target_group_arns.iter().any(|arn| arn == default_target)))
    }

    fn group_spec(
        &self,
        deployment: &Deployment,
        network: &Network,
        request: &StackRequest,
        id: u32,
        image_id: String,
        size: u32,
    ) -> AutoScalingGroupSpec {
        let cloud = &self.clients.config;
        let mut environment = platform_environment(
            deployment,
            &deployment_bucket(deployment),
            cloud,
            self.config.api_port,
        );
        environment.extend(request.environment.clone());

        let user_data = UserData {
            deployment: deployment.name.clone(),
            stack_id: id,
            image_tag: request.image_tag.clone(),
            image_uri: naming::image_uri(
                cloud.account(),
                cloud.region(),
                &self.config.image_repository,
                &request.image_tag,
            ),
            registry_region: cloud.region().to_string(),
            api_port: self.config.api_port,
            host_port: self.config.host_port,
            environment,
        };

        AutoScalingGroupSpec {
            name: naming::auto_scaling_group(&deployment.name, id),
            image_id,
            instance_type: self.config.instance_type.clone(),
            user_data: user_data.render(),
            instance_profile: self.config.instance_profile.clone(),
            subnet_ids: network.private_subnets.clone(),
            security_group_ids: vec![network.security_group_id.clone()],
            size,
            health_check_grace_secs: self.config.health_check_grace_secs,
            tags: BTreeMap::from([
                ("FusebitDeploymentName".to_string(), deployment.name.clone()),
                ("FusebitStackId".to_string(), id.to_string()),
                ("FusebitImageTag".to_string(), request.image_tag.clone()),
            ]),
        }
    }
}
