//! Execution roles for pipeline functions and compute instances.

use std::sync::Arc;

use opsgrid_cloud::identity::{IdentityService, RoleSpec};
use opsgrid_cloud::{CloudClients, CloudConfig, CloudResult, Provisioned};
use tracing::debug;

pub const LAMBDA_PRINCIPAL: &str = "lambda.amazonaws.com";
pub const EC2_PRINCIPAL: &str = "ec2.amazonaws.com";

/// ARN of a provider-managed policy.
pub fn managed_policy(config: &CloudConfig, name: &str) -> String {
    format!("arn:{}:iam::aws:policy/{name}", config.arn_partition())
}

pub struct RoleProvisioner {
    identity: Arc<dyn IdentityService>,
    config: Arc<CloudConfig>,
    permissions_boundary: Option<String>,
}

impl RoleProvisioner {
    pub fn new(clients: &CloudClients, permissions_boundary: Option<String>) -> Self {
        Self {
            identity: clients.identity.clone(),
            config: clients.config.clone(),
            permissions_boundary,
        }
    }

    /// Ensure a role exists with the given managed policies; returns its ARN.
    pub async fn ensure_role(&self, name: &str, principal: &str, policies: &[&str]) -> CloudResult<String> {
        let managed: Vec<String> = policies
            .iter()
            .map(|p| managed_policy(&self.config, p))
            .collect();
        let spec = RoleSpec {
            name: name.to_string(),
            trust_principal: principal.to_string(),
            managed_policies: managed.clone(),
            permissions_boundary: self.permissions_boundary.clone(),
        };
        match self.identity.create_role(&spec).await? {
            Provisioned::Created(arn) => Ok(arn),
            Provisioned::AlreadyExists => {
                debug!(role = name, "role exists, re-attaching policies");
                for policy in &managed {
                    self.identity.attach_role_policy(name, policy).await?;
                }
                Ok(self.config.role_arn(name))
            }
        }
    }

    /// Instance role plus the profile compute instances launch with.
    pub async fn ensure_instance_profile(&self, profile: &str, role: &str, policies: &[&str]) -> CloudResult<String> {
        let arn = self.ensure_role(role, EC2_PRINCIPAL, policies).await?;
        if let Provisioned::AlreadyExists = self.identity.create_instance_profile(profile, role).await? {
            debug!(profile, "instance profile exists");
        }
        Ok(arn)
    }
}
