#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use esox_handlepool::{Manager, Pool, PoolConfiguration};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("driver refused the connection")]
    Refused,
    #[error("socket reset by peer")]
    Reset,
    #[error("close failed")]
    CloseFailed,
}

#[derive(Debug)]
pub struct MockConn {
    pub id: u64,
    pub dsn: String,
}

/// Driver double that records everything the pool does to it.
#[derive(Default)]
pub struct MockDriver {
    next_id: AtomicU64,
    created: AtomicU64,
    closed: AtomicU64,
    probes: AtomicU64,
    live: AtomicI64,
    max_live: AtomicI64,
    dead: AtomicBool,
    probe_errors: AtomicBool,
    refuse: AtomicBool,
    close_errors: AtomicBool,
    connect_delay: Option<Duration>,
    probe_delay: Option<Duration>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn with_probe_delay(delay: Duration) -> Self {
        Self {
            probe_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_dead(&self, dead: bool) {
        self.dead.store(dead, Ordering::SeqCst);
    }

    pub fn set_probe_errors(&self, errors: bool) {
        self.probe_errors.store(errors, Ordering::SeqCst);
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn set_close_errors(&self, errors: bool) {
        self.close_errors.store(errors, Ordering::SeqCst);
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> i64 {
        self.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Manager for MockDriver {
    type Handle = MockConn;
    type Params = String;
    type Error = DriverError;

    async fn create(&self, dsn: &String) -> Result<MockConn, DriverError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DriverError::Refused);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.created.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(MockConn {
            id,
            dsn: dsn.clone(),
        })
    }

    async fn is_usable(&self, _conn: &mut MockConn) -> Result<bool, DriverError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.probe_delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        if self.probe_errors.load(Ordering::SeqCst) {
            return Err(DriverError::Reset);
        }
        Ok(!self.dead.load(Ordering::SeqCst))
    }

    fn close(&self, _conn: MockConn) -> Result<(), DriverError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
        if self.close_errors.load(Ordering::SeqCst) {
            return Err(DriverError::CloseFailed);
        }
        Ok(())
    }
}

pub fn dsn() -> String {
    "mssql://sa@localhost:1433/app".to_string()
}

pub fn pool(config: PoolConfiguration) -> Pool<MockDriver> {
    Pool::new(MockDriver::new(), config).unwrap()
}

pub async fn wait_for_waiters(pool: &Pool<MockDriver>, count: usize) {
    while pool.waiting_count() != count {
        tokio::task::yield_now().await;
    }
}
