//! Data capabilities: relational clusters and their data API, secrets,
//! search domains, key-value tables, and object storage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CloudResult, Provisioned};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Value of the tag named `key`, if present.
pub fn tag_value<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.key == key)
        .map(|t| t.value.as_str())
}

// ── Relational clusters ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub identifier: String,
    pub engine: String,
    pub engine_version: String,
    pub database_name: String,
    pub master_username: String,
    pub master_password: String,
    pub subnet_group: String,
    pub security_group_ids: Vec<String>,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub storage_encrypted: bool,
    pub http_endpoint_enabled: bool,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterStatus {
    Creating,
    Available,
    Other(String),
}

impl ClusterStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "creating" => ClusterStatus::Creating,
            "available" => ClusterStatus::Available,
            other => ClusterStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub identifier: String,
    pub arn: String,
    pub status: ClusterStatus,
    pub endpoint: Option<String>,
    pub port: u16,
    pub resource_id: String,
}

#[async_trait]
pub trait ClusterService: Send + Sync {
    async fn describe_cluster(&self, identifier: &str) -> CloudResult<Option<ClusterInfo>>;

    async fn create_subnet_group(
        &self,
        name: &str,
        subnet_ids: &[String],
        tags: &[Tag],
    ) -> CloudResult<Provisioned>;

    async fn create_cluster(&self, spec: &ClusterSpec) -> CloudResult<Provisioned<ClusterInfo>>;

    async fn add_tags(&self, arn: &str, tags: &[Tag]) -> CloudResult<()>;
}

// ── Data API ───────────────────────────────────────────────────────

/// Handle for issuing SQL against a cluster through its HTTP data API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCredentials {
    pub resource_arn: String,
    pub secret_arn: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Long(i64),
    Text(String),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlParam {
    pub name: String,
    pub value: SqlValue,
}

impl SqlParam {
    pub fn long(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            value: SqlValue::Long(value),
        }
    }

    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: SqlValue::Text(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlOutcome {
    pub records: Vec<Vec<SqlValue>>,
    pub updated_records: u64,
}

#[async_trait]
pub trait DataApiService: Send + Sync {
    async fn begin_transaction(&self, creds: &DbCredentials, database: &str) -> CloudResult<String>;

    /// Query against a missing table fails with `BadRequest`.
    async fn execute(
        &self,
        creds: &DbCredentials,
        database: &str,
        sql: &str,
        params: &[SqlParam],
        transaction_id: Option<&str>,
    ) -> CloudResult<SqlOutcome>;

    async fn commit_transaction(&self, creds: &DbCredentials, transaction_id: &str)
    -> CloudResult<()>;

    async fn rollback_transaction(
        &self,
        creds: &DbCredentials,
        transaction_id: &str,
    ) -> CloudResult<()>;
}

// ── Secrets ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretInfo {
    pub name: String,
    pub arn: String,
    pub tags: Vec<Tag>,
}

#[async_trait]
pub trait SecretService: Send + Sync {
    /// Returns the secret ARN.
    async fn create_secret(&self, name: &str, value: &str, tags: &[Tag]) -> CloudResult<String>;

    async fn find_secrets_by_tag(&self, key: &str, value: &str) -> CloudResult<Vec<SecretInfo>>;
}

// ── Search domains ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDomainSpec {
    pub name: String,
    pub instance_type: String,
    pub instance_count: u32,
    pub volume_size_gb: u32,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub encrypt_at_rest: bool,
    pub access_policy: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDomain {
    pub name: String,
    pub arn: String,
    /// Set once the domain has finished provisioning.
    pub endpoint: Option<String>,
}

#[async_trait]
pub trait SearchService: Send + Sync {
    async fn describe_domain(&self, name: &str) -> CloudResult<Option<SearchDomain>>;

    async fn create_domain(&self, spec: &SearchDomainSpec) -> CloudResult<Provisioned>;
}

// ── Key-value tables ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
    pub ttl_attribute: Option<String>,
}

#[async_trait]
pub trait TableService: Send + Sync {
    async fn create_table(&self, spec: &TableSpec) -> CloudResult<Provisioned>;
}

// ── Object storage ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleRule {
    pub id: String,
    pub prefix: String,
    pub expiration_days: u32,
}

#[async_trait]
pub trait ObjectStorageService: Send + Sync {
    async fn create_bucket(&self, name: &str) -> CloudResult<Provisioned>;

    async fn put_default_encryption(&self, bucket: &str) -> CloudResult<()>;

    async fn block_public_access(&self, bucket: &str) -> CloudResult<()>;

    async fn put_lifecycle_rules(&self, bucket: &str, rules: &[LifecycleRule]) -> CloudResult<()>;
}
