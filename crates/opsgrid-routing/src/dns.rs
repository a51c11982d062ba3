//! Zone resolution and record helpers shared by certificate issuance and
//! target registration.

use opsgrid_cloud::edge::{DnsRecord, DnsService, LoadBalancerInfo};
use tracing::debug;

use crate::error::{RoutingError, RoutingResult};

/// Zone holding the validation records for a certificate domain.
///
/// Strips a leading `*.`, then the deployment segment, then the region
/// segment when present: `*.d1.us-west-2.example.com` and
/// `d1.us-west-2.example.com` both resolve to `example.com`.
pub fn validation_zone<'a>(domain: &'a str, deployment: &str, region: &str) -> &'a str {
    let name = domain.strip_prefix("*.").unwrap_or(domain);
    let name = strip_segment(name, deployment);
    strip_segment(name, region)
}

fn strip_segment<'a>(name: &'a str, segment: &str) -> &'a str {
    name.strip_prefix(segment)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(name)
}

/// Hosted zone id for `domain`, or `ZoneNotFound`.
pub async fn resolve_zone(dns: &dyn DnsService, domain: &str) -> RoutingResult<String> {
    dns.find_zone(domain)
        .await?
        .ok_or_else(|| RoutingError::ZoneNotFound(domain.to_string()))
}

/// Alias record pointing `host` at a load balancer.
pub fn alias_record(host: &str, lb: &LoadBalancerInfo) -> DnsRecord {
    DnsRecord::alias(host, &lb.dns_name, &lb.canonical_zone_id)
}

/// Delete a record, treating an already-absent record as deleted.
///
/// Returns whether a record was actually removed.
pub async fn delete_if_present(
    dns: &dyn DnsService,
    zone_id: &str,
    record: &DnsRecord,
) -> RoutingResult<bool> {
    match dns.delete_record(zone_id, record).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => {
            debug!(record = %record.name, "record already absent");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
