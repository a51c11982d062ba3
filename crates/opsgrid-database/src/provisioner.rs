//! Serverless cluster provisioning.

use opsgrid_cloud::data::{ClusterInfo, ClusterSpec, ClusterStatus, DbCredentials, Tag};
use opsgrid_cloud::{CloudClients, CloudError, PollPolicy, PollState, Provisioned, poll_until};
use opsgrid_core::config::DatabaseConfig;
use opsgrid_core::{OpsConfig, naming};
use opsgrid_state::{Deployment, Network};
use tracing::{debug, info};

use crate::credentials::{self, DEPLOYMENT_TAG, StoredCredentials};
use crate::error::{DatabaseError, DatabaseResult};
use crate::migrations::MigrationRunner;

/// The database port is reachable from any address.
const INGRESS_CIDR: &str = "0.0.0.0/0";

pub struct DatabaseProvisioner {
    clients: CloudClients,
    config: DatabaseConfig,
    ops_version: String,
    poll: PollPolicy,
}

impl DatabaseProvisioner {
    pub fn new(clients: CloudClients, ops: &OpsConfig) -> Self {
        Self {
            clients,
            config: ops.database.clone(),
            ops_version: ops.platform.ops_version.clone(),
            poll: PollPolicy::from(ops.poll.database),
        }
    }

    /// Ensure the deployment's cluster exists and its schema is current.
    pub async fn ensure(&self, deployment: &Deployment, network: &Network) -> DatabaseResult<DbCredentials> {
        let identifier = naming::db_cluster(&deployment.name);
        let tags = self.common_tags(deployment);

        let creds = match self.clients.clusters.describe_cluster(&identifier).await? {
            Some(cluster) => {
                debug!(cluster = %identifier, "cluster exists");
                self.clients.clusters.add_tags(&cluster.arn, &tags).await?;
                // An earlier run that created the cluster but never stored its
                // secret left no way to recover the master password.
                credentials::find_credentials(self.clients.secrets.as_ref(), &deployment.name)
                    .await
                    .map_err(|err| match err {
                        DatabaseError::SecretNotUnique { deployment, found: 0 } => DatabaseError::CredentialsLost {
                            deployment,
                            cluster: identifier.clone(),
                        },
                        other => other,
                    })?
            }
            None => self.create_cluster(deployment, network, &identifier, &tags).await?,
        };

        let runner = MigrationRunner::new(
            self.clients.data_api.clone(),
            &self.config.database_name,
            &self.ops_version,
        );
        let version = runner.run(&creds).await?;
        info!(deployment = %deployment.name, cluster = %identifier, version, "database ready");
        Ok(creds)
    }

    async fn create_cluster(
        &self,
        deployment: &Deployment,
        network: &Network,
        identifier: &str,
        tags: &[Tag],
    ) -> DatabaseResult<DbCredentials> {
        let subnet_group = naming::db_subnet_group(&deployment.name);
        if let Provisioned::AlreadyExists = self
            .clients
            .clusters
            .create_subnet_group(&subnet_group, &network.private_subnets, tags)
            .await?
        {
            debug!(%subnet_group, "subnet group already exists");
        }
        let security_group = self.ensure_security_group(deployment, network).await?;

        let password = credentials::generate_password();
        let spec = ClusterSpec {
            identifier: identifier.to_string(),
            engine: self.config.engine.clone(),
            engine_version: self.config.engine_version.clone(),
            database_name: self.config.database_name.clone(),
            master_username: self.config.master_username.clone(),
            master_password: password.clone(),
            subnet_group,
            security_group_ids: vec![security_group],
            min_capacity: self.config.min_capacity,
            max_capacity: self.config.max_capacity,
            storage_encrypted: true,
            http_endpoint_enabled: true,
            tags: tags.to_vec(),
        };
        if let Provisioned::AlreadyExists = self.clients.clusters.create_cluster(&spec).await? {
            debug!(cluster = %identifier, "cluster creation already under way");
        }
        info!(cluster = %identifier, "cluster creating");

        let cluster = self.wait_until_available(identifier).await?;
        let secret_arn = self
            .store_credentials(deployment, &cluster, &password, tags)
            .await?;
        Ok(DbCredentials {
            resource_arn: cluster.arn,
            secret_arn,
        })
    }

    async fn ensure_security_group(&self, deployment: &Deployment, network: &Network) -> DatabaseResult<String> {
        let name = naming::db_security_group(&deployment.name);
        let groups = &self.clients.security_groups;
        if let Some(id) = groups.find_group(&name, &network.vpc_id).await? {
            return Ok(id);
        }
        let description = format!("DB Security Group for cluster {}", naming::db_cluster(&deployment.name));
        let id = match groups.create_group(&name, &network.vpc_id, &description).await? {
            Provisioned::Created(id) => id,
            Provisioned::AlreadyExists => groups
                .find_group(&name, &network.vpc_id)
                .await?
                .ok_or_else(|| {
                    CloudError::unexpected("security_groups", format!("{name} reported as existing but not found"))
                })?,
        };
        groups
            .authorize_ingress(&id, self.config.port, INGRESS_CIDR)
            .await?;
        Ok(id)
    }

    /// A cluster that is absent or `creating` is still pending; any status
    /// other than `available` ends the wait with an error.
    async fn wait_until_available(&self, identifier: &str) -> DatabaseResult<ClusterInfo> {
        let clusters = &self.clients.clusters;
        let cluster = poll_until(&self.poll, &format!("cluster {identifier}"), |_| async move {
            Ok(match clusters.describe_cluster(identifier).await? {
                None => PollState::Pending,
                Some(c) if c.status == ClusterStatus::Creating => PollState::Pending,
                Some(c) => PollState::Ready(c),
            })
        })
        .await?;

        let status = match &cluster.status {
            ClusterStatus::Available => return Ok(cluster),
            ClusterStatus::Creating => "creating".to_string(),
            ClusterStatus::Other(status) => status.clone(),
        };
        Err(DatabaseError::ClusterFailed {
            identifier: identifier.to_string(),
            status,
        })
    }

    async fn store_credentials(
        &self,
        deployment: &Deployment,
        cluster: &ClusterInfo,
        password: &str,
        tags: &[Tag],
    ) -> DatabaseResult<String> {
        let value = StoredCredentials {
            db_instance_identifier: &cluster.identifier,
            engine: &self.config.engine,
            host: cluster.endpoint.as_deref().unwrap_or_default(),
            port: cluster.port,
            resource_id: &cluster.resource_id,
            username: &self.config.master_username,
            password,
        }
        .to_json()?;
        let name = credentials::secret_name(&deployment.name);
        let secret_tags = credentials::secret_tags(tags, &deployment.name, &cluster.arn);
        let arn = self
            .clients
            .secrets
            .create_secret(&name, &value, &secret_tags)
            .await?;
        debug!(secret = %name, "credentials stored");
        Ok(arn)
    }

    fn common_tags(&self, deployment: &Deployment) -> Vec<Tag> {
        vec![
            Tag::new("fuseopsVersion", &self.ops_version),
            Tag::new(DEPLOYMENT_TAG, &deployment.name),
            Tag::new("account", self.clients.config.account()),
            Tag::new("fusebit-backup-enabled", "true"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use opsgrid_cloud::config::CloudConfig;
    use opsgrid_cloud::data::tag_value;
    use opsgrid_cloud::sim::SimulatedCloud;
    use opsgrid_cloud::CloudProvider;
    use opsgrid_core::ErrorKind;

    fn deployment() -> Deployment {
        Deployment {
            name: "d1".to_string(),
            region: "us-west-2".to_string(),
            network_name: "net1".to_string(),
            domain_name: "example.com".to_string(),
            size: 2,
            segment_key: String::new(),
            elastic_search_endpoint: String::new(),
            data_warehouse_enabled: false,
            feature_use_dns_s3_bucket: false,
            grafana_endpoint: None,
            engine_version_tag: None,
        }
    }

    fn network() -> Network {
        Network {
            name: "net1".to_string(),
            region: "us-west-2".to_string(),
            vpc_id: "vpc-1".to_string(),
            public_subnets: vec!["subnet-a".to_string()],
            private_subnets: vec!["subnet-b".to_string(), "subnet-c".to_string()],
            security_group_id: "sg-1".to_string(),
        }
    }

    fn provisioner(cloud: &SimulatedCloud, ops: &OpsConfig) -> DatabaseProvisioner {
        let clients = cloud.connect(Arc::new(CloudConfig::new("123456789012", "us-west-2", "aws")));
        DatabaseProvisioner::new(clients, ops)
    }

    #[tokio::test]
    async fn fresh_cluster_is_created_secured_and_migrated() {
        let cloud = SimulatedCloud::new().with_cluster_polls(2);
        let db = provisioner(&cloud, &OpsConfig::for_testing());
        let creds = db.ensure(&deployment(), &network()).await.unwrap();

        let cluster = cloud.cluster("fusebit-db-d1").unwrap();
        assert_eq!(cluster.status, ClusterStatus::Available);
        assert_eq!(creds.resource_arn, cluster.arn);
        assert_eq!(
            cloud.security_group_ingress("fusebit-db-security-group-d1"),
            vec![(5432, "0.0.0.0/0".to_string())]
        );

        let tags = cloud.cluster_tags("fusebit-db-d1");
        assert_eq!(tag_value(&tags, "fusebitDeployment"), Some("d1"));
        assert_eq!(tag_value(&tags, "fusebit-backup-enabled"), Some("true"));

        let value: serde_json::Value =
            serde_json::from_str(&cloud.secret_value(&creds.secret_arn).unwrap()).unwrap();
        assert_eq!(value["username"], "fusebit");
        assert_eq!(value["password"].as_str().unwrap().len(), 40);

        let last = (crate::migrations::embedded().len() - 1) as i64;
        assert_eq!(cloud.schema_version(&creds.resource_arn), Some(last));
    }

    #[tokio::test]
    async fn existing_cluster_reuses_tagged_secret() {
        let cloud = SimulatedCloud::new().with_cluster_polls(0);
        let db = provisioner(&cloud, &OpsConfig::for_testing());
        let first = db.ensure(&deployment(), &network()).await.unwrap();
        let second = db.ensure(&deployment(), &network()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cloud.call_count("clusters.create_cluster"), 1);
        assert_eq!(cloud.call_count("clusters.add_tags"), 1);
        assert_eq!(cloud.secrets().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_secret_is_rejected() {
        let cloud = SimulatedCloud::new().with_cluster_polls(0);
        let db = provisioner(&cloud, &OpsConfig::for_testing());
        db.ensure(&deployment(), &network()).await.unwrap();
        cloud.seed_secret(
            "rds-db-credentials/fusebit-db-secret-d1-abcdefghij0123456789",
            vec![Tag::new("fusebitDeployment", "d1")],
        );

        let err = db.ensure(&deployment(), &network()).await.unwrap_err();
        assert!(matches!(err, DatabaseError::SecretNotUnique { found: 2, .. }));
    }

    #[tokio::test]
    async fn cluster_that_never_settles_times_out() {
        let cloud = SimulatedCloud::new().with_cluster_polls(50);
        let mut ops = OpsConfig::for_testing();
        ops.poll.database.max_attempts = 3;
        let db = provisioner(&cloud, &ops);

        let err = db.ensure(&deployment(), &network()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(matches!(err, DatabaseError::Cloud(CloudError::Timeout { attempts: 3, .. })));
        assert!(cloud.secrets().is_empty());
    }

    #[tokio::test]
    async fn cluster_left_without_secret_names_the_recovery() {
        let cloud = SimulatedCloud::new().with_cluster_polls(3);
        let mut ops = OpsConfig::for_testing();
        ops.poll.database.max_attempts = 1;
        let db = provisioner(&cloud, &ops);
        db.ensure(&deployment(), &network()).await.unwrap_err();

        let err = db.ensure(&deployment(), &network()).await.unwrap_err();
        match &err {
            DatabaseError::CredentialsLost { deployment, cluster } => {
                assert_eq!(deployment, "d1");
                assert_eq!(cluster, "fusebit-db-d1");
            }
            other => panic!("expected lost credentials, got {other}"),
        }
        assert!(err.to_string().contains("reset the cluster's master password"));
        assert_eq!(cloud.call_count("clusters.create_cluster"), 1);
    }
}
