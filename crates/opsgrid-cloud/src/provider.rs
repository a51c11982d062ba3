//! Client bundle and the provider factory that builds it.

use std::sync::Arc;

use crate::compute::{AutoScalingService, EventRuleService, FunctionService, ImageService};
use crate::config::CloudConfig;
use crate::data::{
    ClusterService, DataApiService, ObjectStorageService, SearchService, SecretService,
    TableService,
};
use crate::edge::{CertificateService, DnsService, LoadBalancerService, SecurityGroupService};
use crate::identity::IdentityService;
use crate::messaging::{LogService, QueueService};

/// Every capability client, built for one account and region.
///
/// Cheap to clone. Built per reconciliation; two bundles never share
/// configuration.
#[derive(Clone)]
pub struct CloudClients {
    pub config: Arc<CloudConfig>,
    pub functions: Arc<dyn FunctionService>,
    pub rules: Arc<dyn EventRuleService>,
    pub autoscaling: Arc<dyn AutoScalingService>,
    pub images: Arc<dyn ImageService>,
    pub queues: Arc<dyn QueueService>,
    pub logs: Arc<dyn LogService>,
    pub clusters: Arc<dyn ClusterService>,
    pub data_api: Arc<dyn DataApiService>,
    pub secrets: Arc<dyn SecretService>,
    pub search: Arc<dyn SearchService>,
    pub tables: Arc<dyn TableService>,
    pub storage: Arc<dyn ObjectStorageService>,
    pub certificates: Arc<dyn CertificateService>,
    pub dns: Arc<dyn DnsService>,
    pub load_balancers: Arc<dyn LoadBalancerService>,
    pub security_groups: Arc<dyn SecurityGroupService>,
    pub identity: Arc<dyn IdentityService>,
}

impl CloudClients {
    pub fn region(&self) -> &str {
        self.config.region()
    }
}

/// Builds client bundles from an explicit configuration.
pub trait CloudProvider: Send + Sync {
    fn connect(&self, config: Arc<CloudConfig>) -> CloudClients;
}
