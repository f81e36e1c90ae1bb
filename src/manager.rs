//! Driver-facing interfaces: how handles are made, probed and closed,
//! and where the pool reads the time from.

use async_trait::async_trait;
use tokio::time::Instant;

/// Connects the pool to a concrete driver.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use esox_handlepool::Manager;
///
/// struct Loopback;
///
/// #[async_trait]
/// impl Manager for Loopback {
///     type Handle = u32;
///     type Params = String;
///     type Error = std::io::Error;
///
///     async fn create(&self, params: &String) -> Result<u32, std::io::Error> {
///         Ok(params.len() as u32)
///     }
///
///     async fn is_usable(&self, _handle: &mut u32) -> Result<bool, std::io::Error> {
///         Ok(true)
///     }
/// }
/// ```
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    /// The live connection-like object being pooled.
    type Handle: Send + 'static;

    /// Connection parameters, forwarded verbatim to [`Manager::create`].
    type Params: Send + Sync;

    /// Driver error produced by `create`, `is_usable` or `close`.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a fresh live handle.
    async fn create(&self, params: &Self::Params) -> Result<Self::Handle, Self::Error>;

    /// Liveness probe run before an idle handle is handed out again.
    ///
    /// Must not change state the caller can observe. An `Err` counts as
    /// "not alive".
    async fn is_usable(&self, handle: &mut Self::Handle) -> Result<bool, Self::Error>;

    /// Close a handle the pool is discarding.
    fn close(&self, handle: Self::Handle) -> Result<(), Self::Error> {
        drop(handle);
        Ok(())
    }
}

/// Monotonic time source used for handle ages.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Clock backed by tokio's timer, so it follows `tokio::time::pause`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
