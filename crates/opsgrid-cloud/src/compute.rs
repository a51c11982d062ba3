//! Compute capabilities: managed functions, scheduled rules, autoscaling
//! groups, and machine images.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CloudResult, Provisioned};

// ── Functions ──────────────────────────────────────────────────────

/// Location of a function's deployment package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCode {
    pub bucket: String,
    pub key: String,
}

/// VPC placement for a function that must reach private resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcPlacement {
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

/// Full desired state of a managed function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub role_arn: String,
    pub handler: String,
    pub runtime: String,
    pub timeout_secs: u32,
    pub memory_mb: u32,
    pub environment: BTreeMap<String, String>,
    pub code: FunctionCode,
    pub vpc: Option<VpcPlacement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub arn: String,
}

/// State of the most recent code or configuration update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    InProgress,
    Successful,
    Failed(String),
}

/// Grants a service principal the right to invoke a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokePermission {
    pub function_name: String,
    pub statement_id: String,
    pub principal: String,
    pub source_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSourceMapping {
    pub uuid: String,
    pub function_name: String,
    pub event_source_arn: String,
    pub batch_size: u32,
}

#[async_trait]
pub trait FunctionService: Send + Sync {
    async fn create_function(&self, spec: &FunctionSpec) -> CloudResult<Provisioned<FunctionInfo>>;

    async fn get_function(&self, name: &str) -> CloudResult<Option<FunctionInfo>>;

    async fn update_function_code(&self, name: &str, code: &FunctionCode) -> CloudResult<()>;

    /// Rejected with `InProgress` while a code update is still converging.
    async fn update_function_configuration(&self, spec: &FunctionSpec) -> CloudResult<()>;

    async fn last_update_status(&self, name: &str) -> CloudResult<UpdateStatus>;

    async fn add_permission(&self, permission: &InvokePermission) -> CloudResult<Provisioned>;

    async fn list_event_source_mappings(
        &self,
        function_name: &str,
    ) -> CloudResult<Vec<EventSourceMapping>>;

    async fn create_event_source_mapping(
        &self,
        function_name: &str,
        event_source_arn: &str,
        batch_size: u32,
    ) -> CloudResult<Provisioned<String>>;

    async fn delete_event_source_mapping(&self, uuid: &str) -> CloudResult<()>;
}

// ── Scheduled rules ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTarget {
    pub id: String,
    pub arn: String,
}

#[async_trait]
pub trait EventRuleService: Send + Sync {
    /// Create or update a scheduled rule; returns its ARN.
    async fn put_rule(&self, name: &str, schedule: &str) -> CloudResult<String>;

    /// Returns the number of targets the provider failed to attach.
    async fn put_targets(&self, rule: &str, targets: &[RuleTarget]) -> CloudResult<u32>;
}

// ── Autoscaling ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScalingGroupSpec {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub user_data: String,
    pub instance_profile: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub size: u32,
    pub health_check_grace_secs: u32,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoScalingGroupInfo {
    pub name: String,
    pub size: u32,
    pub target_group_arns: Vec<String>,
}

#[async_trait]
pub trait AutoScalingService: Send + Sync {
    async fn create_group(&self, spec: &AutoScalingGroupSpec) -> CloudResult<Provisioned>;

    async fn attach_target_groups(
        &self,
        group: &str,
        target_group_arns: &[String],
    ) -> CloudResult<()>;

    /// Detaching a target group that is not attached is a no-op.
    async fn detach_target_groups(
        &self,
        group: &str,
        target_group_arns: &[String],
    ) -> CloudResult<()>;

    async fn describe_group(&self, group: &str) -> CloudResult<Option<AutoScalingGroupInfo>>;
}

// ── Images ─────────────────────────────────────────────────────────

#[async_trait]
pub trait ImageService: Send + Sync {
    /// Latest base image for an OS version such as `ubuntu-20.04`.
    async fn find_image(&self, os_version: &str) -> CloudResult<Option<String>>;
}
