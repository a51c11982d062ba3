//! Immutable client configuration.
//!
//! Built once per reconciliation from [`OpsConfig`] and the target region,
//! then shared behind an `Arc`. Nothing mutates it after construction, so
//! concurrent reconciliations against different regions never observe
//! each other's settings.

use std::collections::BTreeMap;

use opsgrid_core::{OpsConfig, naming};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    account: String,
    region: String,
    arn_partition: String,
    api_versions: BTreeMap<String, String>,
}

impl CloudConfig {
    pub fn new(account: &str, region: &str, arn_partition: &str) -> Self {
        Self {
            account: account.to_string(),
            region: region.to_string(),
            arn_partition: arn_partition.to_string(),
            api_versions: BTreeMap::new(),
        }
    }

    pub fn from_ops(config: &OpsConfig, region: &str) -> Self {
        Self {
            api_versions: config.platform.api_versions.clone(),
            ..Self::new(&config.platform.account, region, &config.platform.arn_partition)
        }
    }

    pub fn with_api_version(mut self, service: &str, version: &str) -> Self {
        self.api_versions
            .insert(service.to_string(), version.to_string());
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn arn_partition(&self) -> &str {
        &self.arn_partition
    }

    /// Pinned API version for a service, if any.
    pub fn api_version(&self, service: &str) -> Option<&str> {
        self.api_versions.get(service).map(String::as_str)
    }

    pub fn role_arn(&self, role: &str) -> String {
        naming::role_arn(&self.arn_partition, &self.account, role)
    }

    pub fn log_group_arn(&self, group: &str) -> String {
        naming::log_group_arn(&self.arn_partition, &self.region, &self.account, group)
    }

    /// `arn:<partition>:<service>:<region>:<account>:<resource>`.
    pub fn arn(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:{}:{}:{}:{}:{}",
            self.arn_partition, service, self.region, self.account, resource
        )
    }
}
