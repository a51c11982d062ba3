//! Pipeline error types.

use opsgrid_cloud::CloudError;
use opsgrid_core::ErrorKind;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A provider call failed inside a named step.
    #[error("{pipeline} pipeline failed at step '{step}': {source}")]
    Step {
        pipeline: &'static str,
        step: &'static str,
        #[source]
        source: CloudError,
    },

    #[error("malformed search endpoint: {0}")]
    InvalidSearchEndpoint(String),

    #[error("FUSEBIT_GC_BQ_KEY_BASE64 must be set to enable the data warehouse export")]
    MissingWarehouseKey,

    #[error("{failed} target(s) could not be attached to rule '{rule}'")]
    TargetsFailed { rule: String, failed: u32 },

    #[error("update of function '{name}' failed: {reason}")]
    FunctionUpdateFailed { name: String, reason: String },

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Step { source, .. } => source.kind(),
            PipelineError::InvalidSearchEndpoint(_) => ErrorKind::Conflict,
            PipelineError::MissingWarehouseKey
            | PipelineError::TargetsFailed { .. }
            | PipelineError::FunctionUpdateFailed { .. } => ErrorKind::Fatal,
            PipelineError::Cloud(e) => e.kind(),
        }
    }

    /// Name of the step that failed, when known.
    pub fn step(&self) -> Option<&'static str> {
        match self {
            PipelineError::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}
