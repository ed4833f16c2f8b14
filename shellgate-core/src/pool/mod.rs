use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::PoolError;
use crate::session::ConnectionTarget;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub hostname: String,
    pub port: u16,
    pub username: String,
}

impl ConnectionKey {
    pub fn from_target(target: &ConnectionTarget) -> Self {
        Self {
            hostname: target.hostname.clone(),
            port: target.port,
            username: target.username.clone(),
        }
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.hostname, self.port)
    }
}

/// An established SSH transport, owned by `shellgate-ssh`. `shellgate-core`
/// only needs enough of its shape to pool and reap it; the real wire
/// protocol lives on the other side of this trait so the core stays
/// testable without a network.
#[async_trait]
pub trait SshTransport: Send + Sync + Sized + 'static {
    type Channel: Send + Sync + 'static;

    async fn connect(target: &ConnectionTarget, timeout: Duration) -> Result<Self, PoolError>;
    async fn open_channel(&self, cols: u32, rows: u32) -> Result<Self::Channel, PoolError>;
    /// Cheap keep-alive round trip with the caller-supplied deadline.
    async fn probe(&self, deadline: Duration) -> bool;
    async fn close(&self);
}

struct PoolEntry<T: SshTransport> {
    transport: Arc<T>,
    refcount: usize,
    last_used_at: Instant,
    healthy: bool,
}

#[derive(Clone, Debug, Default)]
pub struct PoolStats {
    pub total: usize,
    pub healthy: usize,
    pub cap: usize,
}

/// A live transport checked out of the pool. `OpenChannel` is called on this
/// handle; `Release` (by key) returns the logical ref.
#[derive(Debug)]
pub struct ConnectionHandle<T: SshTransport> {
    pub key: ConnectionKey,
    transport: Arc<T>,
}

impl<T: SshTransport> ConnectionHandle<T> {
    pub async fn open_channel(&self, cols: u32, rows: u32) -> Result<T::Channel, PoolError> {
        self.transport.open_channel(cols, rows).await
    }

    /// Exposes the shared transport itself for callers (the gateway facade)
    /// that need the concrete type for capabilities `SshTransport` doesn't
    /// generalize, like one-shot command execution.
    pub fn transport_arc(&self) -> Arc<T> {
        self.transport.clone()
    }
}

pub struct ConnectionPoolConfig {
    pub pool_cap: usize,
    pub connect_timeout: Duration,
    pub idle_timeout_ssh: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            pool_cap: 10,
            connect_timeout: Duration::from_secs(10),
            idle_timeout_ssh: Duration::from_secs(300),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Keyed by `(hostname, port, username)`; a single lock guards
/// the entry map, each entry's transport handles its own internal locking
/// for channel opens and liveness probes.
pub struct ConnectionPool<T: SshTransport> {
    entries: Mutex<HashMap<ConnectionKey, PoolEntry<T>>>,
    config: ConnectionPoolConfig,
}

impl<T: SshTransport> ConnectionPool<T> {
    pub fn new(config: ConnectionPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub async fn acquire(&self, target: &ConnectionTarget) -> Result<ConnectionHandle<T>, PoolError> {
        let key = ConnectionKey::from_target(target);

        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&key) {
                if entry.transport.probe(Duration::from_secs(2)).await {
                    entry.last_used_at = Instant::now();
                    entry.healthy = true;
                    entry.refcount += 1;
                    return Ok(ConnectionHandle {
                        key,
                        transport: entry.transport.clone(),
                    });
                }
                warn!(%key, "pooled transport failed liveness probe, replacing");
                let stale = entries.remove(&key);
                drop(entries);
                if let Some(stale) = stale {
                    stale.transport.close().await;
                }
            }
        }

        let transport = self.connect_with_retry(target).await?;

        let mut entries = self.entries.lock().await;
        if entries.len() >= self.config.pool_cap && !entries.contains_key(&key) {
            self.evict_oldest_unused(&mut entries).await?;
        }
        entries.insert(
            key.clone(),
            PoolEntry {
                transport: transport.clone(),
                refcount: 1,
                last_used_at: Instant::now(),
                healthy: true,
            },
        );
        info!(%key, "ssh transport established");

        Ok(ConnectionHandle { key, transport })
    }

    async fn evict_oldest_unused(
        &self,
        entries: &mut HashMap<ConnectionKey, PoolEntry<T>>,
    ) -> Result<(), PoolError> {
        let victim = entries
            .iter()
            .filter(|(_, e)| e.refcount == 0)
            .min_by_key(|(_, e)| e.last_used_at)
            .map(|(k, _)| k.clone());

        match victim {
            Some(key) => {
                if let Some(entry) = entries.remove(&key) {
                    info!(%key, "pool at capacity, evicting oldest idle transport");
                    entry.transport.close().await;
                }
                Ok(())
            }
            None => Err(PoolError::PoolSaturated),
        }
    }

    async fn connect_with_retry(&self, target: &ConnectionTarget) -> Result<Arc<T>, PoolError> {
        let mut attempt = 0;
        loop {
            match T::connect(target, self.config.connect_timeout).await {
                Ok(transport) => return Ok(Arc::new(transport)),
                Err(PoolError::ConnectAuthError) => return Err(PoolError::ConnectAuthError),
                Err(err) if attempt + 1 < self.config.retry_attempts => {
                    attempt += 1;
                    debug!(%err, attempt, "retrying ssh connect after transient failure");
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn release(&self, key: &ConnectionKey) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.refcount = entry.refcount.saturating_sub(1);
        }
    }

    pub async fn force_close(&self, key: &ConnectionKey) {
        let removed = self.entries.lock().await.remove(key);
        if let Some(entry) = removed {
            entry.transport.close().await;
            info!(%key, "ssh transport force-closed");
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let entries = self.entries.lock().await;
        PoolStats {
            total: entries.len(),
            healthy: entries.values().filter(|e| e.healthy).count(),
            cap: self.config.pool_cap,
        }
    }

    /// Idle reaper: wakes every minute, closes transports idle
    /// past `idle_timeout_ssh` whose liveness probe also fails. Holds only
    /// the pool lock, never a per-entry lock while probing a different
    /// entry.
    pub async fn run_reaper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let candidates: Vec<(ConnectionKey, Arc<T>)> = {
                let entries = self.entries.lock().await;
                entries
                    .iter()
                    .filter(|(_, e)| e.last_used_at.elapsed() > self.config.idle_timeout_ssh)
                    .map(|(k, e)| (k.clone(), e.transport.clone()))
                    .collect()
            };

            for (key, transport) in candidates {
                if !transport.probe(Duration::from_secs(2)).await {
                    let mut entries = self.entries.lock().await;
                    if let Some(entry) = entries.remove(&key) {
                        drop(entries);
                        entry.transport.close().await;
                        info!(%key, "idle ssh transport reaped");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FakeTransport {
        alive: std::sync::atomic::AtomicBool,
    }

    static CONNECT_COUNT: AtomicUsize = AtomicUsize::new(0);

    #[async_trait]
    impl SshTransport for FakeTransport {
        type Channel = ();

        async fn connect(_target: &ConnectionTarget, _timeout: Duration) -> Result<Self, PoolError> {
            CONNECT_COUNT.fetch_add(1, Ordering::SeqCst);
            Ok(Self {
                alive: std::sync::atomic::AtomicBool::new(true),
            })
        }

        async fn open_channel(&self, _cols: u32, _rows: u32) -> Result<Self::Channel, PoolError> {
            Ok(())
        }

        async fn probe(&self, _deadline: Duration) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn close(&self) {
            self.alive.store(false, Ordering::SeqCst);
        }
    }

    fn target(host: &str) -> ConnectionTarget {
        ConnectionTarget {
            hostname: host.into(),
            port: 22,
            username: "root".into(),
            auth: crate::session::AuthMethod::Password("x".into()),
        }
    }

    #[tokio::test]
    async fn acquire_reuses_existing_healthy_transport() {
        CONNECT_COUNT.store(0, Ordering::SeqCst);
        let pool = ConnectionPool::<FakeTransport>::new(ConnectionPoolConfig::default());
        let _h1 = pool.acquire(&target("h1")).await.unwrap();
        let _h2 = pool.acquire(&target("h1")).await.unwrap();
        assert_eq!(CONNECT_COUNT.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_close_then_acquire_yields_fresh_transport() {
        CONNECT_COUNT.store(0, Ordering::SeqCst);
        let pool = ConnectionPool::<FakeTransport>::new(ConnectionPoolConfig::default());
        let h1 = pool.acquire(&target("h1")).await.unwrap();
        pool.force_close(&h1.key).await;
        pool.acquire(&target("h1")).await.unwrap();
        assert_eq!(CONNECT_COUNT.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pool_saturated_when_all_entries_in_use() {
        let config = ConnectionPoolConfig {
            pool_cap: 1,
            ..ConnectionPoolConfig::default()
        };
        let pool = ConnectionPool::<FakeTransport>::new(config);
        // acquire() leaves the entry with a live refcount, so it isn't a
        // candidate for the overflow eviction below.
        let _h1 = pool.acquire(&target("h1")).await.unwrap();
        let err = pool.acquire(&target("h2")).await.unwrap_err();
        assert!(matches!(err, PoolError::PoolSaturated));
    }

    #[tokio::test]
    async fn released_entry_becomes_evictable() {
        let config = ConnectionPoolConfig {
            pool_cap: 1,
            ..ConnectionPoolConfig::default()
        };
        let pool = ConnectionPool::<FakeTransport>::new(config);
        let h1 = pool.acquire(&target("h1")).await.unwrap();
        pool.release(&h1.key).await;
        pool.acquire(&target("h2")).await.unwrap();
    }
}
