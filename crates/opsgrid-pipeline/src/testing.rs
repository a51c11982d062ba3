//! Fixtures shared by the pipeline tests.

use std::sync::Arc;

use opsgrid_cloud::sim::SimulatedCloud;
use opsgrid_cloud::{CloudClients, CloudConfig, CloudProvider};
use opsgrid_state::{Deployment, Network};

pub fn clients(cloud: &SimulatedCloud) -> CloudClients {
    cloud.connect(Arc::new(CloudConfig::new("123456789012", "us-west-2", "aws")))
}

pub fn deployment() -> Deployment {
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

pub fn network() -> Network {
    Network {
        name: "net1".to_string(),
        region: "us-west-2".to_string(),
        vpc_id: "vpc-1".to_string(),
        public_subnets: vec!["subnet-a".to_string()],
        private_subnets: vec!["subnet-b".to_string(), "subnet-c".to_string()],
        security_group_id: "sg-1".to_string(),
    }
}
