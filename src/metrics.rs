//! Counters describing what the pool has done so far

use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of pool activity
///
/// # Examples
///
/// ```
/// # use async_trait::async_trait;
/// # use esox_handlepool::{Manager, Pool, PoolConfiguration};
/// # struct Echo;
/// # #[async_trait]
/// # impl Manager for Echo {
/// #     type Handle = ();
/// #     type Params = ();
/// #     type Error = std::io::Error;
/// #     async fn create(&self, _: &()) -> Result<(), std::io::Error> { Ok(()) }
/// #     async fn is_usable(&self, _: &mut ()) -> Result<bool, std::io::Error> { Ok(true) }
/// # }
/// # #[tokio::main]
/// # async fn main() {
/// let pool = Pool::new(Echo, PoolConfiguration::default()).unwrap();
///
/// {
///     let _handle = pool.get(&()).await.unwrap();
///     let metrics = pool.metrics();
///     assert_eq!(metrics.created, 1);
///     assert_eq!(metrics.in_use, 1);
/// }
/// assert_eq!(pool.metrics().idle, 1);
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolMetrics {
    /// Handles produced by the factory
    pub created: u64,

    /// Handles closed by the pool (discarded, expired or drained)
    pub closed: u64,

    /// Acquires served from the free list
    pub reused: u64,

    /// Idle handles whose liveness probe failed
    pub validation_failures: u64,

    /// Handles closed because they outlived the maximum lifetime
    pub expired: u64,

    /// Factory calls that failed
    pub construction_failures: u64,

    /// Acquires that had to wait for a handle
    pub waits: u64,

    /// Waiting acquires that hit the operation timeout
    pub timeouts: u64,

    /// Waiting acquires that were cancelled
    pub cancellations: u64,

    /// Handles currently counted against capacity
    pub size: usize,

    /// Idle handles on the free list
    pub idle: usize,

    /// Handles checked out or in flight
    pub in_use: usize,

    /// Callers currently waiting
    pub waiting: usize,

    /// Maximum number of live handles
    pub max_capacity: usize,

    /// `size / max_capacity` (0.0 to 1.0)
    pub utilization: f64,
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub created: AtomicU64,
    pub closed: AtomicU64,
    pub reused: AtomicU64,
    pub validation_failures: AtomicU64,
    pub expired: AtomicU64,
    pub construction_failures: AtomicU64,
    pub waits: AtomicU64,
    pub timeouts: AtomicU64,
    pub cancellations: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, size: usize, idle: usize, waiting: usize, capacity: usize) -> PoolMetrics {
        let utilization = if capacity > 0 {
            size as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            created: self.created.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            size,
            idle,
            in_use: size.saturating_sub(idle),
            waiting,
            max_capacity: capacity,
            utilization,
        }
    }
}
