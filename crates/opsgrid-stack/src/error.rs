//! Stack deployment error types.

use opsgrid_cloud::CloudError;
use opsgrid_core::ErrorKind;
use opsgrid_routing::RoutingError;
use opsgrid_state::StateError;
use thiserror::Error;

pub type StackResult<T> = Result<T, StackError>;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("deployment '{name}' not found in region '{region}'")]
    DeploymentNotFound { name: String, region: String },

    #[error("network '{name}' not found in region '{region}'")]
    NetworkNotFound { name: String, region: String },

    #[error("no machine image for OS version '{0}'")]
    ImageNotFound(String),

    #[error("stack {id} not found for deployment '{deployment}' in region '{region}'")]
    StackNotFound {
        deployment: String,
        region: String,
        id: u32,
    },

    #[error("stack {id} is the last stack serving deployment '{deployment}'; demote it with force to leave the deployment without traffic")]
    DemoteLastStack { deployment: String, id: u32 },

    #[error("stack size must be at least 1")]
    InvalidSize,

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl StackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StackError::DeploymentNotFound { .. }
            | StackError::NetworkNotFound { .. }
            | StackError::ImageNotFound(_)
            | StackError::StackNotFound { .. } => ErrorKind::NotFound,
            StackError::InvalidSize | StackError::DemoteLastStack { .. } => ErrorKind::Conflict,
            StackError::Routing(e) => e.kind(),
            StackError::Cloud(e) => e.kind(),
            StackError::State(e) => e.kind(),
        }
    }
}
