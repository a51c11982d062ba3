//! Reconciliation error types.

use opsgrid_cloud::CloudError;
use opsgrid_core::ErrorKind;
use opsgrid_database::DatabaseError;
use opsgrid_pipeline::PipelineError;
use opsgrid_routing::RoutingError;
use opsgrid_state::StateError;
use thiserror::Error;

pub type ReconcileResult<T> = Result<T, ReconcileError>;
pub type AccountResult<T> = Result<T, AccountError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("deployment '{name}' not found in region '{region}'")]
    DeploymentNotFound { name: String, region: String },

    #[error("network '{name}' not found in region '{region}'")]
    NetworkNotFound { name: String, region: String },

    #[error("deployment domain is '{stored}' and cannot be changed to '{requested}'")]
    DifferentDomain { stored: String, requested: String },

    #[error("deployment network is '{stored}' and cannot be changed to '{requested}'")]
    DifferentNetwork { stored: String, requested: String },

    #[error("invalid deployment parameters: {0}")]
    InvalidParameters(String),

    #[error("bootstrap token could not be issued: {0}")]
    Token(String),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::DeploymentNotFound { .. } | ReconcileError::NetworkNotFound { .. } => {
                ErrorKind::NotFound
            }
            ReconcileError::DifferentDomain { .. }
            | ReconcileError::DifferentNetwork { .. }
            | ReconcileError::InvalidParameters(_) => ErrorKind::Conflict,
            ReconcileError::Token(_) => ErrorKind::Fatal,
            ReconcileError::Account(e) => e.kind(),
            ReconcileError::State(e) => e.kind(),
            ReconcileError::Cloud(e) => e.kind(),
            ReconcileError::Routing(e) => e.kind(),
            ReconcileError::Database(e) => e.kind(),
            ReconcileError::Pipeline(e) => e.kind(),
        }
    }
}

/// Failures reported by an [`AccountData`](crate::AccountData) backend.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account '{0}' not found")]
    AccountNotFound(String),

    #[error("subscription '{subscription}' not found in account '{account}'")]
    SubscriptionNotFound { account: String, subscription: String },

    #[error("account data {operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },
}

impl AccountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccountError::AccountNotFound(_) | AccountError::SubscriptionNotFound { .. } => {
                ErrorKind::NotFound
            }
            AccountError::Backend { .. } => ErrorKind::Fatal,
        }
    }
}
