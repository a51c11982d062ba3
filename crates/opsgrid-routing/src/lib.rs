//! opsgrid-routing: the TLS and routing front door of a deployment.
//!
//! # Architecture
//!
//! ```text
//!   add_alb(deployment)
//!     ├─ NetworkLookup ──► public subnets, security group
//!     ├─ CertificateIssuer::issue("<d>.<region>.<domain>")
//!     │     request ─► ISSUED? done
//!     │             ─► FAILED validation? error
//!     │             ─► CNAMEs in parent zone ─► poll until ISSUED ─► delete CNAMEs
//!     ├─ ensure shared load balancer "<d>-lb" (default target + health check)
//!     ├─ attach WAF "<d>-waf"
//!     └─ A-alias records ──► load balancer
//!
//!   add_target_group(deployment, id)    hostname "<target>.<d>.<region>.<domain>"
//!   remove_target_group(deployment, id)
//!   target_group_arn(deployment, id?)
//! ```

pub mod alb;
pub mod cert;
pub mod dns;
pub mod error;

pub use alb::{LoadBalancerProvisioner, TargetRegistration};
pub use cert::CertificateIssuer;
pub use error::{RoutingError, RoutingResult};
