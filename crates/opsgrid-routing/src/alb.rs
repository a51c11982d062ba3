//! Shared load balancer and per-stack target groups.
//!
//! One load balancer per deployment, named `<d>-lb`, fronts every stack.
//! Each stack gets its own target group and hostname,
//! `<target>.<d>.<region>.<domain>`, routed by a host-header rule. The
//! target name is derived from the stack id (`stack-<id>`) or, without an
//! id, is the default target, so re-attaching a stack always finds the
//! same group.

use std::sync::Arc;

use opsgrid_cloud::edge::{HealthCheck, LoadBalancerInfo, LoadBalancerSpec, TargetGroupSpec};
use opsgrid_cloud::{CloudClients, PollPolicy, Provisioned};
use opsgrid_core::config::AlbConfig;
use opsgrid_core::{OpsConfig, naming};
use opsgrid_state::{Deployment, Network, NetworkLookup};
use tracing::{debug, info};

use crate::cert::CertificateIssuer;
use crate::dns::{alias_record, delete_if_present, resolve_zone};
use crate::error::{RoutingError, RoutingResult};

/// A target group registered behind the shared load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRegistration {
    /// Logical target name, e.g. `stack-3`.
    pub name: String,
    pub host_name: String,
    pub target_group_arn: String,
}

pub struct LoadBalancerProvisioner {
    clients: CloudClients,
    networks: Arc<dyn NetworkLookup>,
    issuer: CertificateIssuer,
    config: AlbConfig,
    target_port: u16,
}

impl LoadBalancerProvisioner {
    pub fn new(clients: CloudClients, networks: Arc<dyn NetworkLookup>, ops: &OpsConfig) -> Self {
        let issuer = CertificateIssuer::new(&clients, PollPolicy::from(ops.poll.certificate));
        Self {
            clients,
            networks,
            issuer,
            config: ops.alb.clone(),
            target_port: ops.stack.host_port,
        }
    }

    /// Certificate, load balancer, WAF, and alias records for a deployment.
    pub async fn add_alb(&self, deployment: &Deployment) -> RoutingResult<LoadBalancerInfo> {
        let network = self.network(deployment).await?;
        let host = naming::deployment_host(&deployment.name, &deployment.region, &deployment.domain_name);
        let certificate_arn = self
            .issuer
            .issue(&host, &deployment.name, &deployment.region)
            .await?;

        let lb = self
            .ensure_load_balancer(deployment, &network, &certificate_arn)
            .await?;

        if self.config.waf_enabled {
            let acl = naming::web_acl(&deployment.name);
            if let Provisioned::AlreadyExists = self
                .clients
                .load_balancers
                .associate_web_acl(&lb.arn, &acl)
                .await?
            {
                debug!(%acl, "web acl already associated");
            }
        }

        let zone_id = resolve_zone(self.clients.dns.as_ref(), &deployment.domain_name).await?;
        let default_host = self.host_for(deployment, &self.config.default_target_name);
        for name in [&host, &default_host] {
            self.clients
                .dns
                .upsert_record(&zone_id, &alias_record(name, &lb))
                .await?;
        }

        info!(deployment = %deployment.name, region = %deployment.region, lb = %lb.name, "load balancer ready");
        Ok(lb)
    }

    async fn ensure_load_balancer(
        &self,
        deployment: &Deployment,
        network: &Network,
        certificate_arn: &str,
    ) -> RoutingResult<LoadBalancerInfo> {
        let name = naming::load_balancer(&deployment.name);
        let lbs = &self.clients.load_balancers;
        if let Some(existing) = lbs.describe_load_balancer(&name).await? {
            debug!(lb = %name, "load balancer exists");
            return Ok(existing);
        }

        let spec = LoadBalancerSpec {
            name: name.clone(),
            subnet_ids: network.public_subnets.clone(),
            security_group_ids: vec![network.security_group_id.clone()],
            certificate_arn: certificate_arn.to_string(),
            default_target: self.target_group_spec(deployment, network, &self.config.default_target_name, false),
        };
        match lbs.create_load_balancer(&spec).await? {
            Provisioned::Created(info) => Ok(info),
            Provisioned::AlreadyExists => lbs
                .describe_load_balancer(&name)
                .await?
                .ok_or(RoutingError::LoadBalancerNotFound(name)),
        }
    }

    /// Register the target for stack `id` and point its hostname at the
    /// load balancer.
    pub async fn add_target_group(
        &self,
        deployment: &Deployment,
        id: u32,
        health_check_disabled: bool,
    ) -> RoutingResult<TargetRegistration> {
        let network = self.network(deployment).await?;
        let lb = self.load_balancer(deployment).await?;
        let target = naming::target_name(&self.config.default_target_name, &self.config.target_prefix, Some(id));
        let host_name = self.host_for(deployment, &target);

        let zone_id = resolve_zone(self.clients.dns.as_ref(), &deployment.domain_name).await?;
        self.clients
            .dns
            .upsert_record(&zone_id, &alias_record(&host_name, &lb))
            .await?;

        let spec = self.target_group_spec(deployment, &network, &target, health_check_disabled);
        let lbs = &self.clients.load_balancers;
        let target_group_arn = match lbs.create_target_group(&spec).await? {
            Provisioned::Created(arn) => arn,
            Provisioned::AlreadyExists => lbs
                .find_target_group(&spec.name)
                .await?
                .ok_or_else(|| RoutingError::TargetGroupNotFound(spec.name.clone()))?,
        };
        lbs.add_host_rule(&lb.listener_arn, &host_name, &target_group_arn)
            .await?;

        info!(deployment = %deployment.name, target = %target, host = %host_name, "target group registered");
        Ok(TargetRegistration {
            name: target,
            host_name,
            target_group_arn,
        })
    }

    /// Delete the hostname record for stack `id`, then deregister its target.
    pub async fn remove_target_group(&self, deployment: &Deployment, id: u32) -> RoutingResult<()> {
        let lb = self.load_balancer(deployment).await?;
        let target = naming::target_name(&self.config.default_target_name, &self.config.target_prefix, Some(id));
        let host_name = self.host_for(deployment, &target);

        let zone_id = resolve_zone(self.clients.dns.as_ref(), &deployment.domain_name).await?;
        delete_if_present(self.clients.dns.as_ref(), &zone_id, &alias_record(&host_name, &lb)).await?;

        let lbs = &self.clients.load_balancers;
        match lbs.remove_host_rule(&lb.listener_arn, &host_name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(host = %host_name, "host rule already absent"),
            Err(e) => return Err(e.into()),
        }
        let group = naming::target_group(&deployment.name, &target);
        let arn = lbs
            .find_target_group(&group)
            .await?
            .ok_or(RoutingError::TargetGroupNotFound(group))?;
        lbs.delete_target_group(&arn).await?;

        info!(deployment = %deployment.name, target = %target, "target group removed");
        Ok(())
    }

    /// ARN of the target for stack `id`, or of the default target. Read only.
    pub async fn target_group_arn(&self, deployment: &Deployment, id: Option<u32>) -> RoutingResult<String> {
        let target = naming::target_name(&self.config.default_target_name, &self.config.target_prefix, id);
        let group = naming::target_group(&deployment.name, &target);
        self.clients
            .load_balancers
            .find_target_group(&group)
            .await?
            .ok_or(RoutingError::TargetGroupNotFound(group))
    }

    // ── Helpers ────────────────────────────────────────────────────

    async fn network(&self, deployment: &Deployment) -> RoutingResult<Network> {
        self.networks
            .get(&deployment.network_name, &deployment.region)
            .await?
            .ok_or_else(|| RoutingError::NetworkNotFound {
                name: deployment.network_name.clone(),
                region: deployment.region.clone(),
            })
    }

    async fn load_balancer(&self, deployment: &Deployment) -> RoutingResult<LoadBalancerInfo> {
        let name = naming::load_balancer(&deployment.name);
        self.clients
            .load_balancers
            .describe_load_balancer(&name)
            .await?
            .ok_or(RoutingError::LoadBalancerNotFound(name))
    }

    fn host_for(&self, deployment: &Deployment, target: &str) -> String {
        naming::target_host(target, &deployment.name, &deployment.region, &deployment.domain_name)
    }

    fn target_group_spec(
        &self,
        deployment: &Deployment,
        network: &Network,
        target: &str,
        health_check_disabled: bool,
    ) -> TargetGroupSpec {
        let health_check = if health_check_disabled {
            HealthCheck {
                path: self.config.disabled_health_check_path.clone(),
                success_codes: self.config.disabled_health_check_codes.clone(),
            }
        } else {
            HealthCheck {
                path: self.config.health_check_path.clone(),
                success_codes: self.config.health_check_codes.clone(),
            }
        };
        TargetGroupSpec {
            name: naming::target_group(&deployment.name, target),
            vpc_id: network.vpc_id.clone(),
            port: self.target_port,
            health_check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsgrid_cloud::config::CloudConfig;
    use opsgrid_cloud::sim::SimulatedCloud;
    use opsgrid_cloud::CloudProvider;
    use opsgrid_cloud::edge::RecordTarget;
    use opsgrid_state::StateStore;

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

    fn setup() -> (SimulatedCloud, LoadBalancerProvisioner) {
        let cloud = SimulatedCloud::new().with_zone("example.com");
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_network(&Network {
                name: "net1".to_string(),
                region: "us-west-2".to_string(),
                vpc_id: "vpc-1".to_string(),
                public_subnets: vec!["subnet-a".to_string(), "subnet-b".to_string()],
                private_subnets: vec!["subnet-c".to_string()],
                security_group_id: "sg-1".to_string(),
            })
            .unwrap();
        let clients = cloud.connect(Arc::new(CloudConfig::new("123456789012", "us-west-2", "aws")));
        let provisioner =
            LoadBalancerProvisioner::new(clients, Arc::new(store), &OpsConfig::for_testing());
        (cloud, provisioner)
    }

    #[tokio::test]
    async fn add_alb_creates_shared_balancer_and_aliases() {
        let (cloud, alb) = setup();
        let lb = alb.add_alb(&deployment()).await.unwrap();
        assert_eq!(lb.name, "d1-lb");
        assert_eq!(cloud.web_acl("d1-lb").as_deref(), Some("d1-waf"));

        let record = cloud
            .dns_record("default-target.d1.us-west-2.example.com")
            .unwrap();
        assert_eq!(
            record.target,
            RecordTarget::Alias {
                dns_name: lb.dns_name.clone(),
                hosted_zone_id: lb.canonical_zone_id.clone(),
            }
        );
        assert!(cloud.dns_record("d1.us-west-2.example.com").is_some());

        let default_arn = alb.target_group_arn(&deployment(), None).await.unwrap();
        assert_eq!(default_arn, lb.default_target_group_arn);
    }

    #[tokio::test]
    async fn add_alb_twice_keeps_one_balancer() {
        let (cloud, alb) = setup();
        let first = alb.add_alb(&deployment()).await.unwrap();
        let second = alb.add_alb(&deployment()).await.unwrap();
        assert_eq!(first.arn, second.arn);
        assert_eq!(cloud.call_count("load_balancers.create_load_balancer"), 1);
    }

    #[tokio::test]
    async fn target_group_lifecycle() {
        let (cloud, alb) = setup();
        let d = deployment();
        alb.add_alb(&d).await.unwrap();

        let reg = alb.add_target_group(&d, 3, false).await.unwrap();
        assert_eq!(reg.name, "stack-3");
        assert_eq!(reg.host_name, "stack-3.d1.us-west-2.example.com");
        assert_eq!(cloud.host_rule(&reg.host_name), Some(reg.target_group_arn.clone()));
        let spec = cloud.target_group("d1-stack-3").unwrap();
        assert_eq!(spec.health_check.path, "/v1/health");
        assert_eq!(
            alb.target_group_arn(&d, Some(3)).await.unwrap(),
            reg.target_group_arn
        );

        alb.remove_target_group(&d, 3).await.unwrap();
        assert!(cloud.dns_record(&reg.host_name).is_none());
        assert!(cloud.target_group("d1-stack-3").is_none());
        let err = alb.target_group_arn(&d, Some(3)).await.unwrap_err();
        assert!(matches!(err, RoutingError::TargetGroupNotFound(_)));
    }

    #[tokio::test]
    async fn disabled_health_check_switches_path() {
        let (cloud, alb) = setup();
        let d = deployment();
        alb.add_alb(&d).await.unwrap();
        alb.add_target_group(&d, 0, true).await.unwrap();

        let spec = cloud.target_group("d1-stack-0").unwrap();
        assert_eq!(spec.health_check.path, "/v1/healthz");
        assert_eq!(spec.health_check.success_codes, "200-499");
    }

    #[tokio::test]
    async fn unknown_network_is_not_found() {
        let (_cloud, alb) = setup();
        let mut d = deployment();
        d.network_name = "missing".to_string();
        let err = alb.add_alb(&d).await.unwrap_err();
        assert_eq!(err.kind(), opsgrid_core::ErrorKind::NotFound);
    }
}
