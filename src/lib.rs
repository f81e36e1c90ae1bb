//! # esox_handlepool
//!
//! Bounded, task-safe pool of reusable connection handles for tokio
//! applications. Establishing a connection is expensive; the pool keeps
//! handles around, checks that an idle handle is still alive before handing
//! it out again, and never lets more than `max_pool_size` handles exist.
//!
//! ## Features
//!
//! - Reuse-first acquisition with a liveness probe on every reused handle
//! - Upper bound on live handles; callers beyond it wait in FIFO order
//! - Maximum handle lifetime
//! - Automatic return of handles via RAII (Drop trait), with poisoning
//! - Acquire timeout and cancellation via `CancellationToken`
//! - Bulk drain that is safe with handles still checked out
//! - Pool warm-up
//! - Registry of pools keyed by connection parameters
//! - Metrics snapshots and health status
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use esox_handlepool::{Manager, Pool, PoolConfiguration};
//!
//! struct Sessions;
//!
//! #[async_trait]
//! impl Manager for Sessions {
//!     type Handle = u64;
//!     type Params = String;
//!     type Error = std::io::Error;
//!
//!     async fn create(&self, _dsn: &String) -> Result<u64, std::io::Error> {
//!         Ok(42)
//!     }
//!
//!     async fn is_usable(&self, _session: &mut u64) -> Result<bool, std::io::Error> {
//!         Ok(true)
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = Pool::new(Sessions, PoolConfiguration::default()).unwrap();
//! {
//!     let session = pool.get(&"db://primary".to_string()).await.unwrap();
//!     println!("Got: {}", *session);
//!     // Handle automatically returned when `session` goes out of scope
//! }
//! assert_eq!(pool.idle_count(), 1);
//! # }
//! ```

mod pool;
mod config;
mod manager;
mod slot;
mod metrics;
mod health;
mod registry;
mod errors;

pub use pool::{Pool, Pooled};
pub use config::PoolConfiguration;
pub use manager::{Clock, Manager, TokioClock};
pub use metrics::PoolMetrics;
pub use health::HealthStatus;
pub use registry::PoolRegistry;
pub use errors::{DriverError, PoolError, PoolResult};

pub use tokio_util::sync::CancellationToken;
