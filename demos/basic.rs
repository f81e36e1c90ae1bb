//! Basic usage examples for the handle pool

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use esox_handlepool::{CancellationToken, Manager, Pool, PoolConfiguration, PoolRegistry};

/// Pretend driver: every handle is a numbered session.
#[derive(Clone, Default)]
struct FakeDriver {
    sessions: std::sync::Arc<AtomicU32>,
    healthy: std::sync::Arc<AtomicBool>,
}

#[async_trait]
impl Manager for FakeDriver {
    type Handle = u32;
    type Params = String;
    type Error = std::io::Error;

    async fn create(&self, dsn: &String) -> Result<u32, std::io::Error> {
        let id = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        println!("   [driver] opened session {} to {}", id, dsn);
        Ok(id)
    }

    async fn is_usable(&self, _session: &mut u32) -> Result<bool, std::io::Error> {
        Ok(self.healthy.load(Ordering::Relaxed))
    }

    fn close(&self, session: u32) -> Result<(), std::io::Error> {
        println!("   [driver] closed session {}", session);
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    println!("=== Esox HandlePool - Basic Examples ===\n");

    // Example 1: Reuse
    simple_pool().await;

    // Example 2: Liveness checks and poisoning
    liveness().await;

    // Example 3: Waiting, timeouts and cancellation
    waiting().await;

    // Example 4: Registry, metrics and health
    registry_and_metrics().await;
}

fn driver() -> FakeDriver {
    let driver = FakeDriver::default();
    driver.healthy.store(true, Ordering::Relaxed);
    driver
}

async fn simple_pool() {
    println!("1. Simple Pool:");
    let pool = Pool::new(driver(), PoolConfiguration::default()).unwrap();
    let dsn = "postgres://localhost/app".to_string();

    {
        let session = pool.get(&dsn).await.unwrap();
        println!("   Got session: {}", *session);
        // Handle automatically returned when dropped
    }

    let session = pool.get(&dsn).await.unwrap();
    println!("   Reused session: {}", *session);
    println!("   Idle after return: {}\n", pool.idle_count());
}

async fn liveness() {
    println!("2. Liveness and Poisoning:");
    let driver = driver();
    let pool = Pool::new(driver.clone(), PoolConfiguration::default()).unwrap();
    let dsn = "postgres://localhost/app".to_string();

    drop(pool.get(&dsn).await.unwrap());
    driver.healthy.store(false, Ordering::Relaxed);
    let session = pool.get(&dsn).await.unwrap();
    println!("   Dead idle session replaced by: {}", *session);
    driver.healthy.store(true, Ordering::Relaxed);

    let mut session = session;
    session.poison();
    drop(session);
    println!("   Size after poisoned release: {}\n", pool.size());
}

async fn waiting() {
    println!("3. Waiting:");
    let config = PoolConfiguration::new()
        .with_max_pool_size(1)
        .with_timeout(Duration::from_millis(100));
    let pool = Pool::new(driver(), config).unwrap();
    let dsn = "postgres://localhost/app".to_string();

    let held = pool.get(&dsn).await.unwrap();
    match pool.get(&dsn).await {
        Ok(_) => println!("   Got session"),
        Err(e) => println!("   Error: {}", e),
    }

    let token = CancellationToken::new();
    token.cancel();
    if let Err(e) = pool.get_with_cancel(&dsn, &token).await {
        println!("   Error: {}", e);
    }

    drop(held);
    println!("   Available after release: {}\n", pool.idle_count());
}

async fn registry_and_metrics() {
    println!("4. Registry, Metrics and Health:");
    let registry = PoolRegistry::new(driver(), PoolConfiguration::new().with_max_pool_size(4)).unwrap();
    let primary = "postgres://primary/app".to_string();
    let replica = "postgres://replica/app".to_string();

    let pool = registry.pool(&primary).unwrap();
    pool.warmup(&primary, 2).await.unwrap();
    let _reader = registry.get(&replica).await.unwrap();

    let health = pool.health_status();
    println!("   Health: {}", if health.is_healthy { "Healthy" } else { "Unhealthy" });
    println!("   Utilization: {:.1}%", health.utilization * 100.0);

    let metrics = pool.metrics();
    println!("   Created: {}, Idle: {}, In use: {}", metrics.created, metrics.idle, metrics.in_use);
    println!("   Pools registered: {}", registry.len());

    println!("   Closed on shutdown: {}", registry.close_all());
}
