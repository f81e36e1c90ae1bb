//! Pool configuration options

use std::time::Duration;

use crate::errors::{PoolError, PoolResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for handle pool behavior
///
/// # Examples
///
/// ```
/// use esox_handlepool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_pool_size(20)
///     .with_max_lifetime_secs(1800)
///     .with_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.max_pool_size, 20);
/// assert_eq!(config.max_lifetime, Some(Duration::from_secs(1800)));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfiguration {
    /// Maximum number of live handles (idle + checked out)
    pub max_pool_size: usize,

    /// Handles older than this are closed instead of being reused.
    /// `None` disables expiry.
    pub max_lifetime: Option<Duration>,

    /// How long `get` may wait for a handle before giving up.
    /// `None` waits indefinitely.
    pub operation_timeout: Option<Duration>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_pool_size: 10,
            max_lifetime: None,
            operation_timeout: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_handlepool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new()
    ///     .with_max_pool_size(50);
    ///
    /// assert_eq!(config.max_pool_size, 50);
    /// ```
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the maximum handle lifetime. A zero duration disables expiry.
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = (!lifetime.is_zero()).then_some(lifetime);
        self
    }

    /// Set the maximum handle lifetime in whole seconds; `0` means unbounded.
    pub fn with_max_lifetime_secs(self, secs: u64) -> Self {
        self.with_max_lifetime(Duration::from_secs(secs))
    }

    /// Set the acquire timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Check the configuration before a pool is built from it.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_pool_size < 1 {
            return Err(PoolError::configuration(format!(
                "max_pool_size must be at least 1, got {}",
                self.max_pool_size
            )));
        }
        Ok(())
    }
}
