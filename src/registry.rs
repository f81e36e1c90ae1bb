//! One pool per distinct set of connection parameters

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::config::PoolConfiguration;
use crate::errors::PoolResult;
use crate::manager::{Clock, Manager, TokioClock};
use crate::pool::{Pool, Pooled};

/// Lazily creates and keeps a [`Pool`] for every parameter value it sees.
///
/// Every pool gets its own clone of the manager and the same configuration.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use esox_handlepool::{Manager, PoolConfiguration, PoolRegistry};
///
/// #[derive(Clone)]
/// struct Dial;
///
/// #[async_trait]
/// impl Manager for Dial {
///     type Handle = String;
///     type Params = String;
///     type Error = std::io::Error;
///
///     async fn create(&self, host: &String) -> Result<String, std::io::Error> {
///         Ok(format!("session@{host}"))
///     }
///
///     async fn is_usable(&self, _session: &mut String) -> Result<bool, std::io::Error> {
///         Ok(true)
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let registry = PoolRegistry::new(Dial, PoolConfiguration::new().with_max_pool_size(4)).unwrap();
///
/// let primary = registry.get(&"db-1".to_string()).await.unwrap();
/// let replica = registry.get(&"db-2".to_string()).await.unwrap();
/// assert_eq!(*primary, "session@db-1");
/// assert_eq!(*replica, "session@db-2");
/// assert_eq!(registry.len(), 2);
/// # }
/// ```
pub struct PoolRegistry<M>
where
    M: Manager + Clone,
    M::Params: Eq + Hash + Clone,
{
    pools: DashMap<M::Params, Pool<M>>,
    manager: M,
    config: PoolConfiguration,
    clock: Arc<dyn Clock>,
}

impl<M> PoolRegistry<M>
where
    M: Manager + Clone,
    M::Params: Eq + Hash + Clone,
{
    /// Create an empty registry. Fails if the configuration is invalid.
    pub fn new(manager: M, config: PoolConfiguration) -> PoolResult<Self> {
        Self::with_clock(manager, config, Arc::new(TokioClock))
    }

    pub fn with_clock(manager: M, config: PoolConfiguration, clock: Arc<dyn Clock>) -> PoolResult<Self> {
        config.validate()?;
        Ok(Self {
            pools: DashMap::new(),
            manager,
            config,
            clock,
        })
    }

    /// The pool serving `params`, created on first use.
    pub fn pool(&self, params: &M::Params) -> PoolResult<Pool<M>> {
        if let Some(pool) = self.pools.get(params) {
            return Ok(pool.value().clone());
        }

        let entry = self.pools.entry(params.clone());
        let pool = match entry {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let pool = Pool::with_clock(
                    self.manager.clone(),
                    self.config.clone(),
                    Arc::clone(&self.clock),
                )?;
                vacant.insert(pool.clone());
                pool
            }
        };
        Ok(pool)
    }

    /// Get a handle from the pool serving `params`.
    pub async fn get(&self, params: &M::Params) -> PoolResult<Pooled<M>> {
        let pool = self.pool(params)?;
        pool.get(params).await
    }

    /// Forget the pool for `params`, closing its idle handles.
    /// Returns whether a pool was registered.
    pub fn remove(&self, params: &M::Params) -> bool {
        match self.pools.remove(params) {
            Some((_, pool)) => {
                pool.close_all();
                true
            }
            None => false,
        }
    }

    /// Drain every registered pool. Returns the number of idle handles closed.
    pub fn close_all(&self) -> usize {
        let pools: Vec<Pool<M>> = self.pools.iter().map(|entry| entry.value().clone()).collect();
        let closed: usize = pools.iter().map(Pool::close_all).sum();
        tracing::info!(pools = pools.len(), closed, "registry drained");
        closed
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
