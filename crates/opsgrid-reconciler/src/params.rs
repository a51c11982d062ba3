//! Caller-facing inputs and outputs of the reconciler.

use opsgrid_state::Deployment;
use serde::{Deserialize, Serialize};

// ── Deployment ─────────────────────────────────────────────────────

/// Requested deployment settings.
///
/// Optional fields left unset take create-time defaults on `add`, or the
/// stored record's values on `exists_and_update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentParams {
    pub deployment_name: String,
    pub region: String,
    pub network_name: String,
    pub domain_name: String,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub segment_key: Option<String>,
    #[serde(default)]
    pub elastic_search_endpoint: Option<String>,
    #[serde(default)]
    pub data_warehouse_enabled: Option<bool>,
    /// Honored on create only.
    #[serde(default)]
    pub feature_use_dns_s3_bucket: Option<bool>,
    #[serde(default)]
    pub grafana_endpoint: Option<String>,
    #[serde(default)]
    pub engine_version_tag: Option<String>,
}

impl DeploymentParams {
    pub fn new(deployment_name: &str, region: &str, network_name: &str, domain_name: &str) -> Self {
        Self {
            deployment_name: deployment_name.to_string(),
            region: region.to_string(),
            network_name: network_name.to_string(),
            domain_name: domain_name.to_string(),
            ..Self::default()
        }
    }

    /// Fill unset fields with the values a new deployment starts with.
    pub fn apply_defaults(&mut self, default_size: u32) {
        self.size.get_or_insert(default_size);
        self.data_warehouse_enabled.get_or_insert(true);
        self.elastic_search_endpoint.get_or_insert_with(String::new);
    }

    /// Take unset fields from the stored record. The bucket naming flag
    /// always comes from the stored record.
    pub fn merge_stored(&mut self, stored: &Deployment) {
        self.feature_use_dns_s3_bucket = Some(stored.feature_use_dns_s3_bucket);
        self.size.get_or_insert(stored.size);
        self.data_warehouse_enabled
            .get_or_insert(stored.data_warehouse_enabled);
        self.elastic_search_endpoint
            .get_or_insert_with(|| stored.elastic_search_endpoint.clone());
        self.segment_key
            .get_or_insert_with(|| stored.segment_key.clone());
        if self.grafana_endpoint.is_none() {
            self.grafana_endpoint = stored.grafana_endpoint.clone();
        }
        if self.engine_version_tag.is_none() {
            self.engine_version_tag = stored.engine_version_tag.clone();
        }
    }

    /// The record these parameters describe. Fields still unset fall back
    /// to the create-time defaults.
    pub fn to_deployment(&self, default_size: u32) -> Deployment {
        Deployment {
            name: self.deployment_name.clone(),
            region: self.region.clone(),
            network_name: self.network_name.clone(),
            domain_name: self.domain_name.clone(),
            size: self.size.unwrap_or(default_size),
            segment_key: self.segment_key.clone().unwrap_or_default(),
            elastic_search_endpoint: self.elastic_search_endpoint.clone().unwrap_or_default(),
            data_warehouse_enabled: self.data_warehouse_enabled.unwrap_or(true),
            feature_use_dns_s3_bucket: self.feature_use_dns_s3_bucket.unwrap_or(false),
            grafana_endpoint: self.grafana_endpoint.clone(),
            engine_version_tag: self.engine_version_tag.clone(),
        }
    }
}

// ── Tenants ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionParams {
    pub deployment_name: String,
    pub region: String,
    /// Existing account to subscribe. A new account is created when unset.
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub subscription_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitAdminParams {
    pub deployment_name: String,
    pub region: String,
    pub account: String,
    pub subscription: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Narrows the token profile to one boundary.
    #[serde(default)]
    pub boundary: Option<String>,
    /// Narrows the token profile to one function.
    #[serde(default)]
    pub function: Option<String>,
}

/// What an administrator needs to finish initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminBootstrap {
    pub user_id: String,
    pub init_id: String,
    /// Single-use secret; only its digest is stored.
    pub secret: String,
    pub token: String,
}
