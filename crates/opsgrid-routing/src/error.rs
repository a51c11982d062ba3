//! Routing error types.

use opsgrid_cloud::CloudError;
use opsgrid_core::ErrorKind;
use opsgrid_state::StateError;
use thiserror::Error;

pub type RoutingResult<T> = Result<T, RoutingError>;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("certificate {arn} validation for '{domain}' has FAILED status")]
    ValidationFailed { arn: String, domain: String },

    #[error("certificate {arn} is not pending validation but has '{status}' status")]
    UnexpectedCertificateStatus { arn: String, status: String },

    #[error("no hosted zone for domain '{0}'")]
    ZoneNotFound(String),

    #[error("network '{name}' not found in {region}")]
    NetworkNotFound { name: String, region: String },

    #[error("load balancer '{0}' does not exist")]
    LoadBalancerNotFound(String),

    #[error("target group '{0}' does not exist")]
    TargetGroupNotFound(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl RoutingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RoutingError::ValidationFailed { .. }
            | RoutingError::UnexpectedCertificateStatus { .. } => ErrorKind::Fatal,
            RoutingError::ZoneNotFound(_)
            | RoutingError::NetworkNotFound { .. }
            | RoutingError::LoadBalancerNotFound(_)
            | RoutingError::TargetGroupNotFound(_) => ErrorKind::NotFound,
            RoutingError::Cloud(e) => e.kind(),
            RoutingError::State(e) => e.kind(),
        }
    }
}
