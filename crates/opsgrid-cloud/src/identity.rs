//! Roles and instance profiles.

use async_trait::async_trait;

use crate::error::{CloudResult, Provisioned};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: String,
    /// Service principal allowed to assume the role, e.g. `lambda.amazonaws.com`.
    pub trust_principal: String,
    pub managed_policies: Vec<String>,
    pub permissions_boundary: Option<String>,
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Returns the role ARN when created.
    async fn create_role(&self, spec: &RoleSpec) -> CloudResult<Provisioned<String>>;

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> CloudResult<()>;

    async fn create_instance_profile(&self, name: &str, role: &str) -> CloudResult<Provisioned>;
}
