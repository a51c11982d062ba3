//! Cloud error types and the tagged provisioning result.

use opsgrid_core::ErrorKind;
use thiserror::Error;

/// Result type alias for cloud capability calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// How a provider classified a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    /// The resource is still converging from an earlier change.
    InProgress,
    BadRequest,
    Throttled,
    Other,
}

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("{service}.{operation} failed ({kind:?}): {message}")]
    Provider {
        service: &'static str,
        operation: &'static str,
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    #[error("unexpected response from {service}: {message}")]
    UnexpectedResponse {
        service: &'static str,
        message: String,
    },
}

impl CloudError {
    pub fn provider(
        service: &'static str,
        operation: &'static str,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        CloudError::Provider {
            service,
            operation,
            kind,
            message: message.into(),
        }
    }

    pub fn unexpected(service: &'static str, message: impl Into<String>) -> Self {
        CloudError::UnexpectedResponse {
            service,
            message: message.into(),
        }
    }

    /// The provider's classification, if this came from a provider call.
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            CloudError::Provider { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.provider_kind() == Some(ProviderErrorKind::NotFound)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CloudError::Provider { kind, .. } => match kind {
                ProviderErrorKind::NotFound => ErrorKind::NotFound,
                ProviderErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
                ProviderErrorKind::Conflict => ErrorKind::Conflict,
                _ => ErrorKind::Fatal,
            },
            CloudError::Timeout { .. } => ErrorKind::Timeout,
            CloudError::UnexpectedResponse { .. } => ErrorKind::Fatal,
        }
    }
}

/// Outcome of an idempotent create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned<T = ()> {
    Created(T),
    /// The resource was already there. Not an error.
    AlreadyExists,
}

impl<T> Provisioned<T> {
    pub fn is_created(&self) -> bool {
        matches!(self, Provisioned::Created(_))
    }

    pub fn created(self) -> Option<T> {
        match self {
            Provisioned::Created(value) => Some(value),
            Provisioned::AlreadyExists => None,
        }
    }

    /// Fold a provider's duplicate-style failure into `AlreadyExists`.
    ///
    /// Adapters whose SDK reports duplicates as errors run their create
    /// result through this; genuine failures pass through untouched.
    pub fn absorb(result: CloudResult<T>) -> CloudResult<Provisioned<T>> {
        match result {
            Ok(value) => Ok(Provisioned::Created(value)),
            Err(err) => match err.provider_kind() {
                Some(
                    ProviderErrorKind::AlreadyExists
                    | ProviderErrorKind::Conflict
                    | ProviderErrorKind::InProgress,
                ) => Ok(Provisioned::AlreadyExists),
                _ => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_folds_duplicates_only() {
        let dup: CloudResult<()> = Err(CloudError::provider(
            "queues",
            "create_queue",
            ProviderErrorKind::AlreadyExists,
            "QueueAlreadyExists",
        ));
        assert_eq!(Provisioned::absorb(dup).unwrap(), Provisioned::AlreadyExists);

        let fatal: CloudResult<()> = Err(CloudError::provider(
            "queues",
            "create_queue",
            ProviderErrorKind::Other,
            "boom",
        ));
        assert!(Provisioned::absorb(fatal).is_err());

        assert!(Provisioned::absorb(Ok(7)).unwrap().is_created());
    }

    #[test]
    fn kind_mapping() {
        let timeout = CloudError::Timeout {
            what: "cluster".to_string(),
            attempts: 3,
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let missing = CloudError::provider("dns", "find_zone", ProviderErrorKind::NotFound, "");
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(missing.is_not_found());
    }
}
