//! Core handle pool implementation

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::health::HealthStatus;
use crate::manager::{Clock, Manager, TokioClock};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::slot::Slot;

const RELEASED: &str = "pooled handle already released";

/// What a releasing caller hands over to a waiting one.
enum Grant<H> {
    /// An idle slot, still counted. The receiver must re-validate it.
    Idle(Slot<H>),
    /// One unit of capacity already counted for the receiver under this epoch.
    Reserved(u64),
    /// The pool was drained while waiting; start over.
    Retry,
}

struct Waiter<H> {
    id: u64,
    tx: oneshot::Sender<Grant<H>>,
}

/// Accounting state. Only touched under `SharedPool::state`.
struct PoolState<H> {
    idle: VecDeque<Slot<H>>,
    size: usize,
    epoch: u64,
    waiters: VecDeque<Waiter<H>>,
    next_waiter_id: u64,
}

impl<H> PoolState<H> {
    fn new(capacity: usize) -> Self {
        Self {
            idle: VecDeque::with_capacity(capacity),
            size: 0,
            epoch: 0,
            waiters: VecDeque::new(),
            next_waiter_id: 0,
        }
    }

    /// Reuse an idle slot, or count a new one if there is room.
    /// New arrivals never overtake callers that are already queued.
    fn checkout(&mut self, capacity: usize) -> Option<Grant<H>> {
        if !self.waiters.is_empty() {
            return None;
        }
        if let Some(slot) = self.idle.pop_front() {
            return Some(Grant::Idle(slot));
        }
        if self.size < capacity {
            self.size += 1;
            return Some(Grant::Reserved(self.epoch));
        }
        None
    }

    fn enqueue(&mut self) -> (u64, oneshot::Receiver<Grant<H>>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter_id;
        self.next_waiter_id = self.next_waiter_id.wrapping_add(1);
        self.waiters.push_back(Waiter { id, tx });
        (id, rx)
    }

    /// Hand a slot to the longest-waiting caller. Gives it back if nobody
    /// is waiting anymore.
    fn offer_slot(&mut self, slot: Slot<H>) -> Option<Slot<H>> {
        let mut grant = Grant::Idle(slot);
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(grant) {
                Ok(()) => return None,
                Err(returned) => grant = returned,
            }
        }
        match grant {
            Grant::Idle(slot) => Some(slot),
            Grant::Reserved(_) | Grant::Retry => None,
        }
    }

    /// Count one unit of capacity for the longest-waiting caller.
    fn offer_capacity(&mut self) -> bool {
        let mut grant = Grant::Reserved(self.epoch);
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(grant) {
                Ok(()) => {
                    self.size += 1;
                    return true;
                }
                Err(returned) => grant = returned,
            }
        }
        false
    }

    /// Uncount one handle (never below zero) and pass the room on.
    fn free_capacity(&mut self, capacity: usize) {
        self.size = self.size.saturating_sub(1);
        if self.size < capacity {
            self.offer_capacity();
        }
    }

    /// Re-admit a counted slot. A slot the accountant does not cover is
    /// returned untouched so the caller can close it.
    fn admit(&mut self, slot: Slot<H>) -> Result<(), Slot<H>> {
        if self.idle.len() >= self.size {
            return Err(slot);
        }
        let Some(slot) = self.offer_slot(slot) else {
            return Ok(());
        };
        self.idle.push_back(slot);
        Ok(())
    }

    /// Put back a grant whose receiver gave up before using it.
    fn restore(&mut self, grant: Grant<H>, capacity: usize) -> Option<Slot<H>> {
        match grant {
            Grant::Idle(slot) if slot.epoch() == self.epoch => self.admit(slot).err(),
            Grant::Idle(slot) => Some(slot),
            Grant::Reserved(epoch) if epoch == self.epoch => {
                self.free_capacity(capacity);
                None
            }
            Grant::Reserved(_) | Grant::Retry => None,
        }
    }
}

struct SharedPool<M: Manager> {
    manager: M,
    config: PoolConfiguration,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState<M::Handle>>,
    metrics: MetricsTracker,
    next_slot_id: AtomicU64,
}

impl<M: Manager> SharedPool<M> {
    fn capacity(&self) -> usize {
        self.config.max_pool_size
    }

    /// Best-effort close; failures are logged and swallowed.
    fn close_slot(&self, slot: Slot<M::Handle>) {
        let id = slot.id();
        if let Err(error) = slot.close(&self.manager) {
            tracing::warn!(slot = id, error = %error, "failed to close pooled handle");
        }
        MetricsTracker::incr(&self.metrics.closed);
    }

    async fn probe(&self, slot: &mut Slot<M::Handle>) -> bool {
        let result = self.manager.is_usable(slot.handle_mut()).await;
        match result {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(slot = slot.id(), "liveness probe failed; discarding handle");
                MetricsTracker::incr(&self.metrics.validation_failures);
                false
            }
            Err(error) => {
                tracing::debug!(slot = slot.id(), error = %error, "liveness probe errored; discarding handle");
                MetricsTracker::incr(&self.metrics.validation_failures);
                false
            }
        }
    }

    fn release(&self, slot: Slot<M::Handle>, poisoned: bool) {
        let id = slot.id();
        let epoch = slot.epoch();
        let expired = slot.is_expired(self.clock.now(), self.config.max_lifetime);

        if poisoned || expired {
            tracing::debug!(slot = id, poisoned, expired, "discarding released handle");
            if expired {
                MetricsTracker::incr(&self.metrics.expired);
            }
            // Closed before its capacity is handed on.
            self.close_slot(slot);
            let mut state = self.state.lock();
            if state.epoch == epoch {
                state.free_capacity(self.capacity());
            }
            return;
        }

        let discard = {
            let mut state = self.state.lock();
            if epoch != state.epoch {
                tracing::debug!(slot = id, "released handle is no longer tracked; closing it");
                Some(slot)
            } else {
                match state.admit(slot) {
                    Ok(()) => None,
                    Err(slot) => {
                        tracing::warn!(slot = id, "released handle is not counted by the pool; closing it");
                        Some(slot)
                    }
                }
            }
        };

        if let Some(slot) = discard {
            self.close_slot(slot);
        }
        tracing::trace!(slot = id, "handle released");
    }

    /// After an in-flight slot failed validation the caller keeps the unit of
    /// capacity it held: either it moves on to the next idle slot (and the
    /// discarded unit is uncounted) or it uses the unit to create a handle.
    fn replace_discarded(&self, epoch: u64) -> Option<Grant<M::Handle>> {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return None;
        }
        match state.idle.pop_front() {
            Some(next) => {
                state.size = state.size.saturating_sub(1);
                Some(Grant::Idle(next))
            }
            None => Some(Grant::Reserved(epoch)),
        }
    }

    fn drain(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.epoch = state.epoch.wrapping_add(1);
            state.size = 0;
            for waiter in state.waiters.drain(..) {
                let _ = waiter.tx.send(Grant::Retry);
            }
            state.idle.drain(..).collect()
        };

        let count = drained.len();
        for slot in drained {
            self.close_slot(slot);
        }
        tracing::info!(closed = count, "handle pool drained");
        count
    }
}

/// Capacity held by an acquire that is still running. Dropping it unsettled,
/// e.g. when the `get` future is cancelled mid-probe, closes the in-flight
/// slot and gives the capacity back.
struct Checkout<'a, M: Manager> {
    pool: &'a SharedPool<M>,
    epoch: u64,
    slot: Option<Slot<M::Handle>>,
    settled: bool,
}

impl<'a, M: Manager> Checkout<'a, M> {
    fn new(pool: &'a SharedPool<M>, epoch: u64, slot: Option<Slot<M::Handle>>) -> Self {
        Self {
            pool,
            epoch,
            slot,
            settled: false,
        }
    }

    fn settle(mut self) -> Option<Slot<M::Handle>> {
        self.settled = true;
        self.slot.take()
    }
}

impl<M: Manager> Drop for Checkout<'_, M> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(slot) = self.slot.take() {
            self.pool.close_slot(slot);
        }
        let mut state = self.pool.state.lock();
        if state.epoch == self.epoch {
            state.free_capacity(self.pool.capacity());
        }
    }
}

/// A queued acquire. Dropping it before a grant arrives leaves the queue and
/// passes on anything that was already sent to it.
struct WaitGuard<'a, M: Manager> {
    pool: &'a SharedPool<M>,
    id: u64,
    rx: oneshot::Receiver<Grant<M::Handle>>,
    received: bool,
}

impl<M: Manager> WaitGuard<'_, M> {
    async fn recv(
        &mut self,
        deadline: Option<Instant>,
        cancel: Option<&CancellationToken>,
    ) -> PoolResult<Grant<M::Handle>> {
        let limit = self.pool.config.operation_timeout.unwrap_or_default();
        let outcome = tokio::select! {
            biased;
            received = &mut self.rx => Ok(received),
            _ = sleep_until(deadline) => Err(PoolError::Timeout(limit)),
            _ = cancelled(cancel) => Err(PoolError::Cancelled),
        };

        let received = outcome?;
        self.received = true;
        // The sender only disappears without sending when the queue is torn down.
        Ok(received.unwrap_or(Grant::Retry))
    }
}

impl<M: Manager> Drop for WaitGuard<'_, M> {
    fn drop(&mut self) {
        if self.received {
            return;
        }
        let orphan = {
            let mut state = self.pool.state.lock();
            let id = self.id;
            state.waiters.retain(|waiter| waiter.id != id);
            self.rx.close();
            match self.rx.try_recv() {
                Ok(grant) => state.restore(grant, self.pool.capacity()),
                Err(_) => None,
            }
        };
        if let Some(slot) = orphan {
            self.pool.close_slot(slot);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

#[derive(Clone, Copy)]
enum Wait<'a> {
    Never,
    Until {
        deadline: Option<Instant>,
        cancel: Option<&'a CancellationToken>,
    },
}

enum Revalidated<H> {
    Usable(Slot<H>),
    Discarded(Option<Grant<H>>),
}

/// Bounded pool of reusable handles produced by a [`Manager`].
///
/// Cloning a `Pool` is cheap; all clones share the same handles.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use esox_handlepool::{Manager, Pool, PoolConfiguration};
///
/// struct Counter;
///
/// #[async_trait]
/// impl Manager for Counter {
///     type Handle = Vec<String>;
///     type Params = String;
///     type Error = std::io::Error;
///
///     async fn create(&self, dsn: &String) -> Result<Self::Handle, Self::Error> {
///         Ok(vec![dsn.clone()])
///     }
///
///     async fn is_usable(&self, _log: &mut Self::Handle) -> Result<bool, Self::Error> {
///         Ok(true)
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = Pool::new(Counter, PoolConfiguration::new().with_max_pool_size(2)).unwrap();
/// let dsn = "postgres://localhost/app".to_string();
///
/// {
///     let mut conn = pool.get(&dsn).await.unwrap();
///     conn.push("SELECT 1".to_string());
/// }
///
/// // The same handle comes back.
/// let conn = pool.get(&dsn).await.unwrap();
/// assert_eq!(conn.len(), 2);
/// # }
/// ```
pub struct Pool<M: Manager> {
    inner: Arc<SharedPool<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Manager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Pool")
            .field("size", &state.size)
            .field("idle", &state.idle.len())
            .field("waiting", &state.waiters.len())
            .field("capacity", &self.inner.capacity())
            .finish()
    }
}

impl<M: Manager> Pool<M> {
    /// Create an empty pool. Fails if the configuration is invalid.
    pub fn new(manager: M, config: PoolConfiguration) -> PoolResult<Self> {
        Self::with_clock(manager, config, Arc::new(TokioClock))
    }

    /// Create an empty pool that reads handle ages from `clock`.
    pub fn with_clock(manager: M, config: PoolConfiguration, clock: Arc<dyn Clock>) -> PoolResult<Self> {
        config.validate()?;

        tracing::info!(
            capacity = config.max_pool_size,
            max_lifetime = ?config.max_lifetime,
            timeout = ?config.operation_timeout,
            "handle pool created"
        );

        Ok(Self {
            inner: Arc::new(SharedPool {
                state: Mutex::new(PoolState::new(config.max_pool_size)),
                manager,
                config,
                clock,
                metrics: MetricsTracker::new(),
                next_slot_id: AtomicU64::new(1),
            }),
        })
    }

    /// Get a usable handle, waiting while the pool is full.
    ///
    /// Gives up with [`PoolError::Timeout`] once the configured
    /// `operation_timeout` has passed.
    pub async fn get(&self, params: &M::Params) -> PoolResult<Pooled<M>> {
        let deadline = self
            .inner
            .config
            .operation_timeout
            .map(|timeout| Instant::now() + timeout);
        let wait = Wait::Until {
            deadline,
            cancel: None,
        };
        self.acquire(params, wait).await
    }

    /// Like [`Pool::get`], but a wait can also be interrupted through `cancel`.
    pub async fn get_with_cancel(
        &self,
        params: &M::Params,
        cancel: &CancellationToken,
    ) -> PoolResult<Pooled<M>> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        let deadline = self
            .inner
            .config
            .operation_timeout
            .map(|timeout| Instant::now() + timeout);
        let wait = Wait::Until {
            deadline,
            cancel: Some(cancel),
        };
        self.acquire(params, wait).await
    }

    /// Get a handle without waiting. Returns `Ok(None)` when the pool is full.
    pub async fn try_get(&self, params: &M::Params) -> PoolResult<Option<Pooled<M>>> {
        match self.acquire(params, Wait::Never).await {
            Ok(pooled) => Ok(Some(pooled)),
            Err(PoolError::Timeout(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Return a handle to the pool.
    ///
    /// `None` reports an acquire that gave up before a handle was produced.
    /// An abandoned `get` hands its capacity back when its future is dropped,
    /// so there is nothing left to release here. Every counted unit belongs
    /// to an idle slot, a checked-out handle or a running acquire; the call
    /// is logged and the accounting is left alone.
    pub fn put(&self, returned: Option<Pooled<M>>, poisoned: bool) {
        match returned {
            Some(mut pooled) => {
                if !Arc::ptr_eq(&pooled.pool, &self.inner) {
                    tracing::warn!(slot = pooled.id(), "handle returned to a pool that does not own it");
                }
                if poisoned {
                    pooled.poison();
                }
            }
            None => {
                let state = self.inner.state.lock();
                tracing::warn!(
                    size = state.size,
                    idle = state.idle.len(),
                    "put(None) has no abandoned capacity to release; ignoring it"
                );
            }
        }
    }

    /// Close every idle handle and reset the accounting.
    ///
    /// Handles still checked out are no longer tracked. They are closed when
    /// they come back. Returns the number of idle handles closed.
    pub fn close_all(&self) -> usize {
        self.inner.drain()
    }

    /// Pre-create up to `count` idle handles without exceeding capacity.
    /// Returns how many were created.
    pub async fn warmup(&self, params: &M::Params, count: usize) -> PoolResult<usize> {
        let inner = &*self.inner;
        let mut created = 0;
        while created < count {
            let epoch = {
                let mut state = inner.state.lock();
                if !state.waiters.is_empty() || state.size >= inner.capacity() {
                    break;
                }
                state.size += 1;
                state.epoch
            };
            let slot = self.create(params, epoch).await?;
            inner.release(slot, false);
            created += 1;
        }
        tracing::debug!(created, requested = count, "pool warmed up");
        Ok(created)
    }

    async fn acquire(&self, params: &M::Params, wait: Wait<'_>) -> PoolResult<Pooled<M>> {
        let mut next = None;
        loop {
            let grant = match next.take() {
                Some(grant) => grant,
                None => self.next_grant(wait).await?,
            };

            match grant {
                Grant::Retry => continue,
                Grant::Reserved(epoch) => {
                    let slot = self.create(params, epoch).await?;
                    return Ok(self.wrap(slot));
                }
                Grant::Idle(slot) => match self.revalidate(slot).await {
                    Revalidated::Usable(slot) => {
                        MetricsTracker::incr(&self.inner.metrics.reused);
                        return Ok(self.wrap(slot));
                    }
                    Revalidated::Discarded(replacement) => next = replacement,
                },
            }
        }
    }

    /// A full pool with nothing to wait for reports a zero-length timeout.
    async fn next_grant(&self, wait: Wait<'_>) -> PoolResult<Grant<M::Handle>> {
        let inner = &*self.inner;
        let (mut waiter, deadline, cancel) = {
            let mut state = inner.state.lock();
            if let Some(grant) = state.checkout(inner.capacity()) {
                return Ok(grant);
            }
            let Wait::Until { deadline, cancel } = wait else {
                return Err(PoolError::Timeout(Duration::ZERO));
            };
            let (id, rx) = state.enqueue();
            let waiter = WaitGuard {
                pool: inner,
                id,
                rx,
                received: false,
            };
            (waiter, deadline, cancel)
        };

        MetricsTracker::incr(&inner.metrics.waits);
        tracing::trace!(waiter = waiter.id, "pool at capacity; waiting for a handle");

        match waiter.recv(deadline, cancel).await {
            Ok(grant) => Ok(grant),
            Err(error) => {
                match error {
                    PoolError::Timeout(_) => MetricsTracker::incr(&inner.metrics.timeouts),
                    PoolError::Cancelled => MetricsTracker::incr(&inner.metrics.cancellations),
                    _ => {}
                }
                tracing::debug!(waiter = waiter.id, error = %error, "gave up waiting for a handle");
                Err(error)
            }
        }
    }

    async fn create(&self, params: &M::Params, epoch: u64) -> PoolResult<Slot<M::Handle>> {
        let inner = &*self.inner;
        let checkout = Checkout::new(inner, epoch, None);

        match inner.manager.create(params).await {
            Ok(handle) => {
                checkout.settle();
                let id = inner.next_slot_id.fetch_add(1, Ordering::Relaxed);
                MetricsTracker::incr(&inner.metrics.created);
                tracing::trace!(slot = id, "created new handle");
                Ok(Slot::new(id, handle, inner.clock.now(), epoch))
            }
            Err(error) => {
                MetricsTracker::incr(&inner.metrics.construction_failures);
                tracing::warn!(error = %error, "handle factory failed");
                drop(checkout);
                Err(PoolError::construction(error))
            }
        }
    }

    async fn revalidate(&self, slot: Slot<M::Handle>) -> Revalidated<M::Handle> {
        let inner = &*self.inner;
        let epoch = slot.epoch();
        let mut checkout = Checkout::new(inner, epoch, Some(slot));

        let usable = match checkout.slot.as_mut() {
            Some(slot) if slot.is_expired(inner.clock.now(), inner.config.max_lifetime) => {
                tracing::debug!(slot = slot.id(), "idle handle outlived max lifetime; discarding");
                MetricsTracker::incr(&inner.metrics.expired);
                false
            }
            Some(slot) => inner.probe(slot).await,
            None => false,
        };

        match checkout.settle() {
            Some(slot) if usable => Revalidated::Usable(slot),
            Some(slot) => {
                inner.close_slot(slot);
                Revalidated::Discarded(inner.replace_discarded(epoch))
            }
            None => Revalidated::Discarded(inner.replace_discarded(epoch)),
        }
    }

    fn wrap(&self, slot: Slot<M::Handle>) -> Pooled<M> {
        tracing::trace!(slot = slot.id(), "handle checked out");
        Pooled {
            slot: Some(slot),
            pool: Arc::clone(&self.inner),
            poisoned: false,
        }
    }

    /// Handles currently counted against capacity (idle + checked out).
    pub fn size(&self) -> usize {
        self.inner.state.lock().size
    }

    /// Idle handles on the free list.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Handles checked out by callers or being validated.
    pub fn in_use_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.size.saturating_sub(state.idle.len())
    }

    /// Callers blocked waiting for a handle.
    pub fn waiting_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.inner.config
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        let (size, idle, waiting) = {
            let state = self.inner.state.lock();
            (state.size, state.idle.len(), state.waiters.len())
        };
        self.inner
            .metrics
            .get_metrics(size, idle, waiting, self.inner.capacity())
    }

    /// Get health status
    pub fn health_status(&self) -> HealthStatus {
        let state = self.inner.state.lock();
        let idle = state.idle.len();
        HealthStatus::new(
            idle,
            state.size.saturating_sub(idle),
            state.waiters.len(),
            self.inner.capacity(),
        )
    }
}

/// A checked-out handle. Goes back to its pool when dropped.
///
/// Call [`Pooled::poison`] when the handle misbehaved; it is then closed on
/// release instead of being reused.
pub struct Pooled<M: Manager> {
    slot: Option<Slot<M::Handle>>,
    pool: Arc<SharedPool<M>>,
    poisoned: bool,
}

impl<M: Manager> Pooled<M> {
    /// Mark the handle as unusable. It is closed on release.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Pool-unique identifier of the underlying slot.
    pub fn id(&self) -> u64 {
        self.slot().id()
    }

    /// When the underlying handle was created.
    pub fn born(&self) -> Instant {
        self.slot().born()
    }

    pub fn age(&self) -> Duration {
        self.slot().age(self.pool.clock.now())
    }

    /// Give the handle back now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }

    fn slot(&self) -> &Slot<M::Handle> {
        self.slot.as_ref().expect(RELEASED)
    }
}

impl<M: Manager> Deref for Pooled<M> {
    type Target = M::Handle;

    fn deref(&self) -> &Self::Target {
        self.slot().handle()
    }
}

impl<M: Manager> DerefMut for Pooled<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.slot.as_mut().expect(RELEASED).handle_mut()
    }
}

impl<M: Manager> Drop for Pooled<M> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot, self.poisoned);
        }
    }
}

impl<M: Manager> fmt::Debug for Pooled<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.slot.as_ref().map(Slot::id))
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    struct TestManager {
        next: AtomicU64,
        closed: AtomicU64,
        usable: AtomicBool,
        fail: AtomicBool,
    }

    impl TestManager {
        fn new() -> Self {
            Self {
                next: AtomicU64::new(0),
                closed: AtomicU64::new(0),
                usable: AtomicBool::new(true),
                fail: AtomicBool::new(false),
            }
        }

        fn created(&self) -> u64 {
            self.next.load(Ordering::SeqCst)
        }

        fn closed(&self) -> u64 {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Manager for TestManager {
        type Handle = u64;
        type Params = ();
        type Error = Refused;

        async fn create(&self, _params: &()) -> Result<u64, Refused> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Refused);
            }
            Ok(self.next.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn is_usable(&self, _handle: &mut u64) -> Result<bool, Refused> {
            Ok(self.usable.load(Ordering::SeqCst))
        }

        fn close(&self, _handle: u64) -> Result<(), Refused> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pool(capacity: usize) -> Pool<TestManager> {
        Pool::new(
            TestManager::new(),
            PoolConfiguration::new().with_max_pool_size(capacity),
        )
        .unwrap()
    }

    async fn wait_for_waiters(pool: &Pool<TestManager>, count: usize) {
        while pool.waiting_count() != count {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = Pool::new(TestManager::new(), PoolConfiguration::new().with_max_pool_size(0));
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_released_handle_is_reused() {
        let pool = pool(2);

        let first = pool.get(&()).await.unwrap();
        let id = first.id();
        assert_eq!(*first, 1);
        drop(first);

        assert_eq!(pool.idle_count(), 1);
        let again = pool.get(&()).await.unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(pool.manager().created(), 1);
        assert_eq!(pool.metrics().reused, 1);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn test_poisoned_handle_is_closed() {
        let pool = pool(1);

        let mut conn = pool.get(&()).await.unwrap();
        conn.poison();
        drop(conn);

        assert_eq!(pool.size(), 0);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.manager().closed(), 1);
    }

    #[tokio::test]
    async fn test_put_with_poison_flag() {
        let pool = pool(1);

        let conn = pool.get(&()).await.unwrap();
        pool.put(Some(conn), true);

        assert_eq!(pool.size(), 0);
        assert_eq!(pool.manager().closed(), 1);
    }

    #[tokio::test]
    async fn test_try_get_does_not_wait() {
        let pool = pool(1);

        let held = pool.try_get(&()).await.unwrap();
        assert!(held.is_some());
        assert!(pool.try_get(&()).await.unwrap().is_none());
        assert_eq!(pool.waiting_count(), 0);

        drop(held);
        assert!(pool.try_get(&()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_none_keeps_accounting() {
        let pool = pool(1);

        pool.put(None, false);
        assert_eq!(pool.size(), 0);

        let held = pool.get(&()).await.unwrap();
        pool.put(None, false);
        assert_eq!(pool.size(), 1);
        assert!(pool.try_get(&()).await.unwrap().is_none());

        drop(held);
        let again = pool.get(&()).await.unwrap();
        assert_eq!(*again, 1);
        drop(again);

        assert_eq!(pool.manager().created(), 1);
        assert_eq!(pool.manager().closed(), 0);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_uncounted_slot_is_not_admitted() {
        let mut state = PoolState::new(2);
        let slot = Slot::new(1, 7u64, Instant::now(), 0);

        let rejected = state.admit(slot).unwrap_err();
        assert_eq!(rejected.id(), 1);
        assert!(state.idle.is_empty());
        assert_eq!(state.size, 0);

        state.size = 1;
        assert!(state.admit(rejected).is_ok());
        assert_eq!(state.idle.len(), 1);
    }

    #[tokio::test]
    async fn test_factory_failure_rolls_back() {
        let pool = pool(1);
        pool.manager().fail.store(true, Ordering::SeqCst);

        let err = pool.get(&()).await.unwrap_err();
        assert!(matches!(err, PoolError::Construction(_)));
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.metrics().construction_failures, 1);

        pool.manager().fail.store(false, Ordering::SeqCst);
        assert!(pool.get(&()).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_probe_replaces_handle() {
        let pool = pool(1);

        drop(pool.get(&()).await.unwrap());
        pool.manager().usable.store(false, Ordering::SeqCst);

        let conn = pool.get(&()).await.unwrap();
        assert_eq!(*conn, 2);
        assert_eq!(pool.manager().closed(), 1);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.metrics().validation_failures, 1);
    }

    #[tokio::test]
    async fn test_every_dead_idle_handle_is_skipped() {
        let pool = pool(3);

        let held: Vec<_> = vec![
            pool.get(&()).await.unwrap(),
            pool.get(&()).await.unwrap(),
            pool.get(&()).await.unwrap(),
        ];
        drop(held);
        assert_eq!(pool.idle_count(), 3);
        pool.manager().usable.store(false, Ordering::SeqCst);

        let conn = pool.get(&()).await.unwrap();
        assert_eq!(*conn, 4);
        assert_eq!(pool.manager().created(), 4);
        assert_eq!(pool.manager().closed(), 3);
        assert_eq!(pool.metrics().validation_failures, 3);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_close_all_is_idempotent() {
        let pool = pool(3);

        let a = pool.get(&()).await.unwrap();
        let b = pool.get(&()).await.unwrap();
        drop(a);
        drop(b);

        assert_eq!(pool.close_all(), 2);
        assert_eq!(pool.close_all(), 0);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.manager().closed(), 2);
    }

    #[tokio::test]
    async fn test_release_after_close_all_is_not_readmitted() {
        let pool = pool(1);

        let conn = pool.get(&()).await.unwrap();
        pool.close_all();
        drop(conn);

        assert_eq!(pool.size(), 0);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.manager().closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_state_untouched() {
        let pool = Pool::new(
            TestManager::new(),
            PoolConfiguration::new()
                .with_max_pool_size(1)
                .with_timeout(Duration::from_millis(100)),
        )
        .unwrap();

        let _held = pool.get(&()).await.unwrap();
        let err = pool.get(&()).await.unwrap_err();

        assert!(matches!(err, PoolError::Timeout(limit) if limit == Duration::from_millis(100)));
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.waiting_count(), 0);
        assert_eq!(pool.metrics().timeouts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_wait() {
        let pool = pool(1);
        let token = CancellationToken::new();

        let _held = pool.get(&()).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            let token = token.clone();
            tokio::spawn(async move { pool.get_with_cancel(&(), &token).await.map(|c| c.id()) })
        };

        wait_for_waiters(&pool, 1).await;
        token.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PoolError::Cancelled)));
        assert_eq!(pool.waiting_count(), 0);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.metrics().cancellations, 1);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_lose_handle() {
        let pool = pool(1);

        let held = pool.get(&()).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get(&()).await.map(|c| c.id()) })
        };

        wait_for_waiters(&pool, 1).await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(pool.waiting_count(), 0);

        drop(held);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn test_grant_sent_to_dropped_waiter_is_restored() {
        let pool = pool(1);
        let held = pool.get(&()).await.unwrap();

        let inner = &*pool.inner;
        let (id, rx) = inner.state.lock().enqueue();
        let guard = WaitGuard {
            pool: inner,
            id,
            rx,
            received: false,
        };

        // The release hands the slot straight to the queued waiter...
        drop(held);
        assert_eq!(pool.idle_count(), 0);

        // ...which gives up before looking at it.
        drop(guard);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn test_warmup_respects_capacity() {
        let pool = pool(3);

        assert_eq!(pool.warmup(&(), 5).await.unwrap(), 3);
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.warmup(&(), 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_health_and_metrics_snapshot() {
        let pool = pool(1);

        let _held = pool.get(&()).await.unwrap();
        let health = pool.health_status();
        assert!(!health.is_healthy);
        assert_eq!(health.active_handles, 1);

        let metrics = pool.metrics();
        assert_eq!(metrics.in_use, 1);
        assert_eq!(metrics.created, 1);
        assert!((metrics.utilization - 1.0).abs() < f64::EPSILON);
    }
}
