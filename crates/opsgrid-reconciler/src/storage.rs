//! Deployment bucket and log table.

use opsgrid_cloud::data::{LifecycleRule, TableSpec};
use opsgrid_cloud::{CloudClients, CloudResult, Provisioned};
use opsgrid_core::naming;
use opsgrid_pipeline::deployment_bucket;
use opsgrid_state::Deployment;
use tracing::debug;

/// Function logs are kept for one day.
const FUNCTION_LOGS_PREFIX: &str = "function-logs/";
const FUNCTION_LOGS_EXPIRATION_DAYS: u32 = 1;

/// Ensure the bucket exists, is encrypted and private, and expires
/// function logs. Settings are re-applied when the bucket already exists.
pub async fn ensure_bucket(clients: &CloudClients, deployment: &Deployment) -> CloudResult<String> {
    let bucket = deployment_bucket(deployment);
    let storage = &clients.storage;
    if let Provisioned::AlreadyExists = storage.create_bucket(&bucket).await? {
        debug!(%bucket, "bucket already exists");
    }
    storage.put_default_encryption(&bucket).await?;
    storage.block_public_access(&bucket).await?;
    storage
        .put_lifecycle_rules(
            &bucket,
            &[LifecycleRule {
                id: "function-logs".to_string(),
                prefix: FUNCTION_LOGS_PREFIX.to_string(),
                expiration_days: FUNCTION_LOGS_EXPIRATION_DAYS,
            }],
        )
        .await?;
    Ok(bucket)
}

pub fn log_table_spec(deployment: &Deployment) -> TableSpec {
    TableSpec {
        name: naming::log_table(&deployment.name),
        partition_key: "accountId".to_string(),
        sort_key: Some("timestamp".to_string()),
        ttl_attribute: Some("ttl".to_string()),
    }
}

pub async fn ensure_log_table(clients: &CloudClients, deployment: &Deployment) -> CloudResult<String> {
    let spec = log_table_spec(deployment);
    if let Provisioned::AlreadyExists = clients.tables.create_table(&spec).await? {
        debug!(table = %spec.name, "log table already exists");
    }
    Ok(spec.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use opsgrid_cloud::CloudProvider;
    use opsgrid_cloud::config::CloudConfig;
    use opsgrid_cloud::sim::SimulatedCloud;

    fn deployment(use_dns: bool) -> Deployment {
        Deployment {
            name: "d1".to_string(),
            region: "us-west-2".to_string(),
            network_name: "net1".to_string(),
            domain_name: "example.com".to_string(),
            size: 2,
            segment_key: String::new(),
            elastic_search_endpoint: String::new(),
            data_warehouse_enabled: false,
            feature_use_dns_s3_bucket: use_dns,
            grafana_endpoint: None,
            engine_version_tag: None,
        }
    }

    #[tokio::test]
    async fn bucket_is_private_encrypted_and_expires_logs() {
        let cloud = SimulatedCloud::new();
        let clients = cloud.connect(Arc::new(CloudConfig::new("123456789012", "us-west-2", "aws")));

        let bucket = ensure_bucket(&clients, &deployment(false)).await.unwrap();
        assert_eq!(bucket, "fusebit-d1-us-west-2");
        let state = cloud.bucket(&bucket).unwrap();
        assert!(state.encrypted);
        assert!(state.public_access_blocked);
        assert_eq!(state.lifecycle[0].prefix, "function-logs/");
        assert_eq!(state.lifecycle[0].expiration_days, 1);

        // Second run converges.
        ensure_bucket(&clients, &deployment(false)).await.unwrap();
        assert_eq!(cloud.call_count("storage.create_bucket"), 2);
    }

    #[tokio::test]
    async fn dns_bucket_name_and_log_table() {
        let cloud = SimulatedCloud::new();
        let clients = cloud.connect(Arc::new(CloudConfig::new("123456789012", "us-west-2", "aws")));

        let bucket = ensure_bucket(&clients, &deployment(true)).await.unwrap();
        assert_eq!(bucket, "d1.us-west-2.example.com");

        let table = ensure_log_table(&clients, &deployment(true)).await.unwrap();
        assert_eq!(table, "d1.log");
        assert!(cloud.has_table("d1.log"));
        ensure_log_table(&clients, &deployment(true)).await.unwrap();
    }
}
