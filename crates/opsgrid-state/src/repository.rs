//! Async repository ports over the record store.
//!
//! The reconciler and deployers depend on these traits rather than on
//! `StateStore`, so a remote table service can stand in for the embedded
//! store without touching orchestration code.

use async_trait::async_trait;

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::*;

/// Persisted deployment records keyed by `(name, region)`.
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    async fn get(&self, name: &str, region: &str) -> StateResult<Option<Deployment>>;

    /// Fails with `AlreadyExists` when the key is taken.
    async fn add(&self, deployment: &Deployment) -> StateResult<()>;

    /// Fails with `NotFound` when the key is absent.
    async fn update(&self, deployment: &Deployment) -> StateResult<()>;

    async fn delete(&self, name: &str, region: &str) -> StateResult<bool>;

    async fn list(
        &self,
        filter: &DeploymentFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> StateResult<ListPage<Deployment>>;
}

/// Read-only resolver of `(network, region)` to VPC placement.
#[async_trait]
pub trait NetworkLookup: Send + Sync {
    async fn get(&self, name: &str, region: &str) -> StateResult<Option<Network>>;
}

/// Write-once stack records.
#[async_trait]
pub trait StackRepository: Send + Sync {
    async fn list(&self, deployment: &str, region: &str) -> StateResult<Vec<Stack>>;

    async fn add(&self, stack: &Stack) -> StateResult<()>;
}

#[async_trait]
impl DeploymentRepository for StateStore {
    async fn get(&self, name: &str, region: &str) -> StateResult<Option<Deployment>> {
        self.get_deployment(name, region)
    }

    async fn add(&self, deployment: &Deployment) -> StateResult<()> {
        self.insert_deployment(deployment)
    }

    async fn update(&self, deployment: &Deployment) -> StateResult<()> {
        self.replace_deployment(deployment)
    }

    async fn delete(&self, name: &str, region: &str) -> StateResult<bool> {
        self.delete_deployment(name, region)
    }

    async fn list(
        &self,
        filter: &DeploymentFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> StateResult<ListPage<Deployment>> {
        self.list_deployments(filter, cursor, limit)
    }
}

#[async_trait]
impl NetworkLookup for StateStore {
    async fn get(&self, name: &str, region: &str) -> StateResult<Option<Network>> {
        self.get_network(name, region)
    }
}

#[async_trait]
impl StackRepository for StateStore {
    async fn list(&self, deployment: &str, region: &str) -> StateResult<Vec<Stack>> {
        self.list_stacks(deployment, region)
    }

    async fn add(&self, stack: &Stack) -> StateResult<()> {
        self.insert_stack(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StateError;
    use std::sync::Arc;

    fn deployment(name: &str) -> Deployment {
        Deployment {
            name: name.to_string(),
            region: "us-west-2".to_string(),
            network_name: "net1".to_string(),
            domain_name: "example.com".to_string(),
            size: 2,
            segment_key: String::new(),
            elastic_search_endpoint: String::new(),
            data_warehouse_enabled: true,
            feature_use_dns_s3_bucket: false,
            grafana_endpoint: None,
            engine_version_tag: None,
        }
    }

    #[tokio::test]
    async fn repository_through_trait_object() {
        let repo: Arc<dyn DeploymentRepository> = Arc::new(StateStore::open_in_memory().unwrap());
        repo.add(&deployment("d1")).await.unwrap();

        let err = repo.add(&deployment("d1")).await.unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
        assert_eq!(err.kind(), opsgrid_core::ErrorKind::AlreadyExists);

        let page = repo
            .list(&DeploymentFilter::default(), None, DEFAULT_PAGE_SIZE)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(repo.delete("d1", "us-west-2").await.unwrap());
        assert!(repo.get("d1", "us-west-2").await.unwrap().is_none());
    }
}
