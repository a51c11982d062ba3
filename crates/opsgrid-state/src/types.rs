//! Record types for the OpsGrid record store.
//!
//! All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

// ── Deployment ─────────────────────────────────────────────────────

/// One named, regional instance of the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deployment {
    pub name: String,
    pub region: String,
    pub network_name: String,
    /// Immutable once the record exists.
    pub domain_name: String,
    pub size: u32,
    /// Telemetry write key; an empty value disables telemetry forwarding.
    #[serde(default)]
    pub segment_key: String,
    /// Search-index endpoint URL, a JSON domain template, or empty.
    #[serde(default)]
    pub elastic_search_endpoint: String,
    pub data_warehouse_enabled: bool,
    /// Only ever set on creation; updates carry the stored value forward.
    #[serde(default)]
    pub feature_use_dns_s3_bucket: bool,
    #[serde(default)]
    pub grafana_endpoint: Option<String>,
    #[serde(default)]
    pub engine_version_tag: Option<String>,
}

impl Deployment {
    /// Composite key: `{name}/{region}`.
    pub fn table_key(&self) -> String {
        deployment_key(&self.name, &self.region)
    }
}

pub fn deployment_key(name: &str, region: &str) -> String {
    format!("{name}/{region}")
}

/// Filter for paginated deployment listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentFilter {
    pub name_prefix: Option<String>,
    pub region: Option<String>,
}

impl DeploymentFilter {
    pub fn matches(&self, deployment: &Deployment) -> bool {
        let name_ok = self
            .name_prefix
            .as_deref()
            .is_none_or(|p| deployment.name.starts_with(p));
        let region_ok = self
            .region
            .as_deref()
            .is_none_or(|r| deployment.region == r);
        name_ok && region_ok
    }
}

/// One page of a listing. `next_cursor` is set when more items remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Page size used when a caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

// ── Network ────────────────────────────────────────────────────────

/// VPC placement for a deployment. Owned elsewhere; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub region: String,
    pub vpc_id: String,
    pub public_subnets: Vec<String>,
    pub private_subnets: Vec<String>,
    pub security_group_id: String,
}

impl Network {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.name, self.region)
    }
}

// ── Stack ──────────────────────────────────────────────────────────

/// One autoscaled fleet of a deployment, running a single image tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stack {
    pub deployment_name: String,
    pub region: String,
    pub id: u32,
    pub image_tag: String,
    pub size: u32,
    /// Unix timestamp (seconds) when the stack was launched.
    pub created_at: u64,
}

impl Stack {
    /// Composite key: `{deployment}/{region}:{id}`.
    pub fn table_key(&self) -> String {
        format!("{}{}", stack_prefix(&self.deployment_name, &self.region), self.id)
    }
}

/// Key prefix shared by every stack of one deployment.
pub fn stack_prefix(deployment: &str, region: &str) -> String {
    format!("{deployment}/{region}:")
}
