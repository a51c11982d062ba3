//! opsgrid-pipeline: queue- and trigger-driven background job chains.
//!
//! # Architecture
//!
//! ```text
//!   cron       DLQ ─► DLQ arn ─► queue(redrive) ─► queue arn ─► executor ─► mapping
//!                  ─► rule ─► scheduler ─► permission ─► rule target
//!
//!   analytics  log group(+retention) ─► [search domain] ─► function ─► permission
//!                  ─► subscription filter (put or delete)
//!
//!   dwh        rule ─► exporter ─► permission ─► rule target
//! ```
//!
//! Every pipeline runs its steps strictly in order through a
//! [`StepRunner`], which stops at the first failure and names the step
//! that failed. Create calls report duplicates as
//! [`Provisioned::AlreadyExists`](opsgrid_cloud::Provisioned), so reruns
//! converge instead of failing.

pub mod analytics;
pub mod cron;
pub mod dwh;
pub mod error;
pub mod function;
pub mod role;
pub mod step;

#[cfg(test)]
mod testing;

pub use analytics::{AnalyticsPipeline, AnalyticsResources, SearchEndpoint};
pub use cron::{CronPipeline, CronResources};
pub use dwh::{DwhPipeline, DwhResources};
pub use error::{PipelineError, PipelineResult};
pub use step::StepRunner;

use opsgrid_cloud::compute::FunctionCode;
use opsgrid_core::naming;
use opsgrid_state::Deployment;

/// Runtime every pipeline function is deployed with.
pub const FUNCTION_RUNTIME: &str = "nodejs18.x";

/// The deployment's storage bucket.
pub fn deployment_bucket(deployment: &Deployment) -> String {
    naming::storage_bucket(
        &deployment.name,
        &deployment.region,
        &deployment.domain_name,
        deployment.feature_use_dns_s3_bucket,
    )
}

/// Deployment package for a pipeline function, kept in the deployment bucket.
pub fn function_code(deployment: &Deployment, package: &str) -> FunctionCode {
    FunctionCode {
        bucket: deployment_bucket(deployment),
        key: format!("functions/{package}.zip"),
    }
}
