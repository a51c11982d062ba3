//! Edge capabilities: certificates, DNS, load balancing, firewall groups.

use async_trait::async_trait;

use crate::error::{CloudResult, Provisioned};

// ── Certificates ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    PendingValidation,
    Issued,
    Failed,
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    PendingValidation,
    Success,
    Failed,
}

/// DNS record the certificate authority expects to find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRecord {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainValidation {
    pub domain: String,
    pub status: ValidationStatus,
    /// Absent until the authority has generated it.
    pub record: Option<ValidationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDetail {
    pub arn: String,
    pub status: CertificateStatus,
    pub validations: Vec<DomainValidation>,
}

#[async_trait]
pub trait CertificateService: Send + Sync {
    /// Request (or reuse) a certificate; returns its ARN.
    async fn request_certificate(&self, hostname: &str, alt_names: &[String])
    -> CloudResult<String>;

    async fn describe_certificate(&self, arn: &str) -> CloudResult<CertificateDetail>;
}

// ── DNS ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Cname,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordTarget {
    Value(String),
    Alias {
        dns_name: String,
        hosted_zone_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub record_type: RecordType,
    pub target: RecordTarget,
}

impl DnsRecord {
    pub fn cname(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            record_type: RecordType::Cname,
            target: RecordTarget::Value(value.to_string()),
        }
    }

    pub fn alias(name: &str, dns_name: &str, hosted_zone_id: &str) -> Self {
        Self {
            name: name.to_string(),
            record_type: RecordType::A,
            target: RecordTarget::Alias {
                dns_name: dns_name.to_string(),
                hosted_zone_id: hosted_zone_id.to_string(),
            },
        }
    }
}

#[async_trait]
pub trait DnsService: Send + Sync {
    /// Hosted zone id for an exact domain name.
    async fn find_zone(&self, domain: &str) -> CloudResult<Option<String>>;

    async fn upsert_record(&self, zone_id: &str, record: &DnsRecord) -> CloudResult<()>;

    async fn delete_record(&self, zone_id: &str, record: &DnsRecord) -> CloudResult<()>;
}

// ── Load balancing ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub path: String,
    pub success_codes: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroupSpec {
    pub name: String,
    pub vpc_id: String,
    pub port: u16,
    pub health_check: HealthCheck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerSpec {
    pub name: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub certificate_arn: String,
    pub default_target: TargetGroupSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerInfo {
    pub name: String,
    pub arn: String,
    pub dns_name: String,
    /// Hosted zone of the load balancer itself, for alias records.
    pub canonical_zone_id: String,
    pub listener_arn: String,
    pub default_target_group_arn: String,
}

#[async_trait]
pub trait LoadBalancerService: Send + Sync {
    async fn describe_load_balancer(&self, name: &str) -> CloudResult<Option<LoadBalancerInfo>>;

    async fn create_load_balancer(
        &self,
        spec: &LoadBalancerSpec,
    ) -> CloudResult<Provisioned<LoadBalancerInfo>>;

    async fn associate_web_acl(&self, load_balancer_arn: &str, acl_name: &str)
    -> CloudResult<Provisioned>;

    /// Returns the target group ARN when created.
    async fn create_target_group(&self, spec: &TargetGroupSpec) -> CloudResult<Provisioned<String>>;

    async fn find_target_group(&self, name: &str) -> CloudResult<Option<String>>;

    async fn delete_target_group(&self, arn: &str) -> CloudResult<()>;

    /// Forward requests for `host` to a target group.
    async fn add_host_rule(
        &self,
        listener_arn: &str,
        host: &str,
        target_group_arn: &str,
    ) -> CloudResult<Provisioned>;

    async fn remove_host_rule(&self, listener_arn: &str, host: &str) -> CloudResult<()>;
}

// ── Security groups ────────────────────────────────────────────────

#[async_trait]
pub trait SecurityGroupService: Send + Sync {
    async fn find_group(&self, name: &str, vpc_id: &str) -> CloudResult<Option<String>>;

    /// Returns the group id when created.
    async fn create_group(
        &self,
        name: &str,
        vpc_id: &str,
        description: &str,
    ) -> CloudResult<Provisioned<String>>;

    async fn authorize_ingress(&self, group_id: &str, port: u16, cidr: &str)
    -> CloudResult<Provisioned>;
}
