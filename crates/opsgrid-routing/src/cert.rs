//! Certificate issuance with DNS validation.
//!
//! Per hostname the certificate moves through `PENDING_VALIDATION` to
//! `ISSUED`, or stops at a failed validation:
//!
//! 1. request a certificate for `hostname` plus `*.hostname`
//! 2. already `ISSUED`: done, no DNS side effects
//! 3. any validation `FAILED`: error before touching DNS
//! 4. otherwise upsert one CNAME per distinct validation record name in the
//!    parent zone
//! 5. poll until `ISSUED`
//! 6. delete the CNAMEs (best effort, failures are logged)

use std::collections::BTreeMap;
use std::sync::Arc;

use opsgrid_cloud::edge::{
    CertificateDetail, CertificateService, CertificateStatus, DnsRecord, DnsService,
    ValidationStatus,
};
use opsgrid_cloud::{CloudClients, PollPolicy, PollState, poll_until};
use tracing::{debug, info, warn};

use crate::dns::{resolve_zone, validation_zone};
use crate::error::{RoutingError, RoutingResult};

pub struct CertificateIssuer {
    certificates: Arc<dyn CertificateService>,
    dns: Arc<dyn DnsService>,
    poll: PollPolicy,
}

impl CertificateIssuer {
    pub fn new(clients: &CloudClients, poll: PollPolicy) -> Self {
        Self {
            certificates: clients.certificates.clone(),
            dns: clients.dns.clone(),
            poll,
        }
    }

    /// Issue a certificate for `hostname` and its wildcard; returns the ARN.
    ///
    /// `deployment` and `region` locate the parent zone for validation
    /// records.
    pub async fn issue(&self, hostname: &str, deployment: &str, region: &str) -> RoutingResult<String> {
        let alt_names = vec![format!("*.{hostname}")];
        let arn = self
            .certificates
            .request_certificate(hostname, &alt_names)
            .await?;
        let detail = self.certificates.describe_certificate(&arn).await?;

        match &detail.status {
            CertificateStatus::Issued => {
                debug!(hostname, %arn, "certificate already issued");
                return Ok(arn);
            }
            CertificateStatus::PendingValidation => {}
            other => return Err(unexpected_status(&arn, other)),
        }
        if let Some(domain) = failed_validation(&detail) {
            return Err(RoutingError::ValidationFailed {
                arn,
                domain: domain.to_string(),
            });
        }

        let detail = self.wait_for_validation_records(detail).await?;
        let mut created = Vec::new();
        let outcome = self
            .validate(&detail, deployment, region, &mut created)
            .await;
        self.cleanup(&created).await;
        outcome?;

        info!(hostname, %arn, "certificate issued");
        Ok(arn)
    }

    /// The authority may not have generated every record yet.
    async fn wait_for_validation_records(
        &self,
        detail: CertificateDetail,
    ) -> RoutingResult<CertificateDetail> {
        if records_ready(&detail) {
            return Ok(detail);
        }
        let certificates = &self.certificates;
        let arn = detail.arn.as_str();
        let detail = poll_until(&self.poll, &format!("validation records of {arn}"), |_| async move {
            let detail = certificates.describe_certificate(arn).await?;
            Ok(if records_ready(&detail) {
                PollState::Ready(detail)
            } else {
                PollState::Pending
            })
        })
        .await?;
        Ok(detail)
    }

    async fn validate(
        &self,
        detail: &CertificateDetail,
        deployment: &str,
        region: &str,
        created: &mut Vec<(String, DnsRecord)>,
    ) -> RoutingResult<()> {
        for (zone_domain, record) in pending_records(detail, deployment, region) {
            let zone_id = resolve_zone(self.dns.as_ref(), zone_domain).await?;
            self.dns.upsert_record(&zone_id, &record).await?;
            debug!(record = %record.name, zone = zone_domain, "validation record created");
            created.push((zone_id, record));
        }

        let certificates = &self.certificates;
        let arn = detail.arn.as_str();
        let settled = poll_until(&self.poll, &format!("certificate {arn}"), |_| async move {
            let detail = certificates.describe_certificate(arn).await?;
            let settled = detail.status != CertificateStatus::PendingValidation
                || failed_validation(&detail).is_some();
            Ok(if settled {
                PollState::Ready(detail)
            } else {
                PollState::Pending
            })
        })
        .await?;

        if let Some(domain) = failed_validation(&settled) {
            return Err(RoutingError::ValidationFailed {
                arn: settled.arn.clone(),
                domain: domain.to_string(),
            });
        }
        match &settled.status {
            CertificateStatus::Issued => Ok(()),
            other => Err(unexpected_status(&settled.arn, other)),
        }
    }

    async fn cleanup(&self, created: &[(String, DnsRecord)]) {
        for (zone_id, record) in created {
            if let Err(e) = self.dns.delete_record(zone_id, record).await {
                warn!(record = %record.name, error = %e, "failed to delete validation record");
            }
        }
    }
}

fn unexpected_status(arn: &str, status: &CertificateStatus) -> RoutingError {
    RoutingError::UnexpectedCertificateStatus {
        arn: arn.to_string(),
        status: format!("{status:?}"),
    }
}

fn failed_validation(detail: &CertificateDetail) -> Option<&str> {
    detail
        .validations
        .iter()
        .find(|v| v.status == ValidationStatus::Failed)
        .map(|v| v.domain.as_str())
}

fn records_ready(detail: &CertificateDetail) -> bool {
    detail
        .validations
        .iter()
        .filter(|v| v.status == ValidationStatus::PendingValidation)
        .all(|v| v.record.is_some())
}

/// CNAMEs for pending validations, one per record name, with the zone
/// domain each belongs in.
fn pending_records<'a>(
    detail: &'a CertificateDetail,
    deployment: &str,
    region: &str,
) -> Vec<(&'a str, DnsRecord)> {
    let mut by_name: BTreeMap<&str, (&str, DnsRecord)> = BTreeMap::new();
    for validation in &detail.validations {
        if validation.status != ValidationStatus::PendingValidation {
            continue;
        }
        let Some(record) = &validation.record else {
            continue;
        };
        by_name.entry(record.name.as_str()).or_insert_with(|| {
            (
                validation_zone(&validation.domain, deployment, region),
                DnsRecord::cname(&record.name, &record.value),
            )
        });
    }
    by_name.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsgrid_cloud::config::CloudConfig;
    use opsgrid_cloud::sim::{CertificateScenario, SimulatedCloud};
    use opsgrid_cloud::{CloudError, CloudProvider};
    use std::time::Duration;

    const HOST: &str = "d1.us-west-2.example.com";

    fn issuer(cloud: &SimulatedCloud, attempts: u32) -> CertificateIssuer {
        let clients = cloud.connect(Arc::new(CloudConfig::new("123456789012", "us-west-2", "aws")));
        CertificateIssuer::new(&clients, PollPolicy::fixed(attempts, Duration::ZERO))
    }

    #[tokio::test]
    async fn issued_certificate_makes_no_dns_calls() {
        let cloud = SimulatedCloud::new()
            .with_zone("example.com")
            .with_certificate_scenario(CertificateScenario::Issued);
        let arn = issuer(&cloud, 3).issue(HOST, "d1", "us-west-2").await.unwrap();
        assert!(arn.contains(":acm:"));
        assert_eq!(cloud.call_count("dns."), 0);
    }

    #[tokio::test]
    async fn failed_validation_stops_before_dns() {
        let cloud = SimulatedCloud::new()
            .with_zone("example.com")
            .with_certificate_scenario(CertificateScenario::ValidationFailed);
        let err = issuer(&cloud, 3)
            .issue(HOST, "d1", "us-west-2")
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::ValidationFailed { .. }));
        assert_eq!(cloud.call_count("dns."), 0);
    }

    #[tokio::test]
    async fn pending_certificate_validates_through_dns_then_cleans_up() {
        let cloud = SimulatedCloud::new()
            .with_zone("example.com")
            .with_certificate_scenario(CertificateScenario::PendingThenIssued { polls: 2 });
        issuer(&cloud, 5).issue(HOST, "d1", "us-west-2").await.unwrap();

        // Base name and wildcard share one validation record.
        assert_eq!(cloud.call_count("dns.upsert_record"), 1);
        assert_eq!(cloud.call_count("dns.delete_record"), 1);
        assert!(cloud.dns_records().is_empty());
    }

    #[tokio::test]
    async fn issued_certificate_is_reused() {
        let cloud = SimulatedCloud::new()
            .with_zone("example.com")
            .with_certificate_scenario(CertificateScenario::PendingThenIssued { polls: 0 });
        let issuer = issuer(&cloud, 3);
        let first = issuer.issue(HOST, "d1", "us-west-2").await.unwrap();
        let upserts = cloud.call_count("dns.upsert_record");

        let second = issuer.issue(HOST, "d1", "us-west-2").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cloud.call_count("dns.upsert_record"), upserts);
    }

    #[tokio::test]
    async fn never_issued_times_out_and_removes_records() {
        let cloud = SimulatedCloud::new()
            .with_zone("example.com")
            .with_certificate_scenario(CertificateScenario::NeverIssued);
        let err = issuer(&cloud, 3)
            .issue(HOST, "d1", "us-west-2")
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::Cloud(CloudError::Timeout { .. })));
        assert!(cloud.dns_records().is_empty());
    }

    #[tokio::test]
    async fn missing_zone_is_not_found() {
        let cloud = SimulatedCloud::new();
        let err = issuer(&cloud, 3)
            .issue(HOST, "d1", "us-west-2")
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::ZoneNotFound(ref d) if d == "example.com"));
    }
}
