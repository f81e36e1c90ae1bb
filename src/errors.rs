//! Error types for the handle pool

use std::sync::Arc;
use thiserror::Error;

/// Type-erased driver error carried by [`PoolError::Construction`].
pub type DriverError = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    Configuration(String),

    #[error("Failed to construct a new handle: {0}")]
    Construction(#[source] DriverError),

    #[error("Pool exhausted - no handle became available within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl PoolError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        PoolError::Configuration(message.into())
    }

    pub(crate) fn construction<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PoolError::Construction(Arc::new(error))
    }

    /// Whether the caller may reasonably retry the acquire.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Construction(_) | PoolError::Timeout(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    #[test]
    fn test_construction_keeps_source() {
        let err = PoolError::construction(Refused);
        assert_eq!(err.to_string(), "Failed to construct a new handle: connection refused");
        assert!(err.source().is_some());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_configuration_is_not_retryable() {
        let err = PoolError::configuration("max_pool_size must be at least 1");
        assert!(!err.is_retryable());
        assert!(!PoolError::Cancelled.is_retryable());
    }
}
