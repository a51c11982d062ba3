//! Database provisioning errors.

use opsgrid_cloud::CloudError;
use opsgrid_core::ErrorKind;
use thiserror::Error;

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("cluster '{identifier}' reached status '{status}' instead of 'available'")]
    ClusterFailed { identifier: String, status: String },

    #[error(
        "expected exactly one credentials secret for deployment '{deployment}', found {found}; delete the cluster and try again"
    )]
    SecretNotUnique { deployment: String, found: usize },

    #[error(
        "cluster '{cluster}' exists but deployment '{deployment}' has no credentials secret; reset the cluster's master password and store it in a new tagged secret, or delete the cluster and try again"
    )]
    CredentialsLost { deployment: String, cluster: String },

    #[error("credentials secret '{0}' does not carry the dbArn tag")]
    SecretMissingDbArn(String),

    #[error("unable to determine the schema version of the database")]
    SchemaVersionUnreadable,

    #[error("mismatched schema version when updating to {0}")]
    VersionMismatch(i64),

    #[error("migration {version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: CloudError,
    },

    #[error("invalid secret name pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("failed to encode credentials: {0}")]
    Encode(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

impl DatabaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatabaseError::Migration { source, .. } => source.kind(),
            DatabaseError::Cloud(e) => e.kind(),
            _ => ErrorKind::Fatal,
        }
    }
}
