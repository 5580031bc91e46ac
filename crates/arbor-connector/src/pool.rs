//! Bounded pooling of connections to one source.
//!
//! The pool is the only shared mutable resource between callers: its idle
//! queue and size bookkeeping live behind one mutex, and `acquire` is the
//! only operation that blocks (bounded by `max_wait`). Connections are
//! returned by dropping the [`PooledConnection`] guard.
//!
//! # Invariants
//!
//! - `in_use + idle.len() <= max_size` at all times.
//! - An idle connection older than `keep_alive` is never handed out; it is
//!   closed and replaced on the next acquire that sees it.
//! - With `validate_before_use`, a connection that fails its liveness ping
//!   is closed instead of reused; the acquire continues with the next idle
//!   connection or a fresh connect.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{ConnectorError, ConnectorResult};
use crate::traits::{Connection, Source};

/// Tuning knobs for a [`ConnectionPool`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum number of connections, in use plus idle. Must be positive.
    pub max_size: usize,
    /// How long an idle connection may sit in the pool before it is closed
    /// instead of reused.
    pub keep_alive: Duration,
    /// Bound for liveness pings run before reuse and between failed connect
    /// attempts.
    pub ping_timeout: Duration,
    /// How many failed connect attempts to tolerate before surfacing
    /// `SourceUnavailable`. Zero means the first failure is fatal.
    pub max_failed_attempts: u32,
    /// How long `acquire` may wait for a connection to be released when the
    /// pool is exhausted.
    pub max_wait: Duration,
    /// Ping idle connections before handing them out.
    pub validate_before_use: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            keep_alive: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(5),
            max_failed_attempts: 10,
            max_wait: Duration::from_secs(10),
            validate_before_use: false,
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> ConnectorResult<()> {
        if self.max_size == 0 {
            return Err(ConnectorError::Validation(
                "pool max_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

struct IdleConnection {
    connection: Box<dyn Connection>,
    since: Instant,
}

struct PoolState {
    idle: VecDeque<IdleConnection>,
    in_use: usize,
    shutdown: bool,
}

struct PoolInner {
    source: Arc<dyn Source>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
    total_created: AtomicU64,
    total_used: AtomicU64,
}

/// A bounded pool of reusable connections to one [`Source`].
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(source: Arc<dyn Source>, config: PoolConfig) -> ConnectorResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                source,
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    in_use: 0,
                    shutdown: false,
                }),
                available: Condvar::new(),
                total_created: AtomicU64::new(0),
                total_used: AtomicU64::new(0),
            }),
        })
    }

    pub fn source_name(&self) -> &str {
        self.inner.source.name()
    }

    /// Acquire a connection, blocking up to `max_wait` when the pool is
    /// exhausted.
    pub fn acquire(&self) -> ConnectorResult<PooledConnection> {
        let config = &self.inner.config;
        let deadline = Instant::now() + config.max_wait;
        let mut state = self.lock_state()?;
        loop {
            if state.shutdown {
                return Err(ConnectorError::PoolShutDown(self.source_name().to_string()));
            }

            // Close idle connections that outlived their keep-alive.
            loop {
                let expired = state
                    .idle
                    .front()
                    .is_some_and(|idle| idle.since.elapsed() > config.keep_alive);
                if !expired {
                    break;
                }
                if let Some(mut stale) = state.idle.pop_front() {
                    stale.connection.close();
                    warn!(
                        source = self.source_name(),
                        "closed idle connection past its keep-alive"
                    );
                }
            }

            if let Some(idle) = state.idle.pop_front() {
                state.in_use += 1;
                drop(state);
                let mut connection = idle.connection;
                if config.validate_before_use && !connection.ping(config.ping_timeout) {
                    connection.close();
                    warn!(
                        source = self.source_name(),
                        "discarded pooled connection that failed its liveness ping"
                    );
                    state = self.lock_state()?;
                    state.in_use -= 1;
                    continue;
                }
                self.inner.total_used.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConnection::new(self.clone(), connection));
            }

            if state.in_use + state.idle.len() < config.max_size {
                state.in_use += 1;
                drop(state);
                return match self.connect_with_retries() {
                    Ok(connection) => {
                        self.inner.total_used.fetch_add(1, Ordering::Relaxed);
                        Ok(PooledConnection::new(self.clone(), connection))
                    }
                    Err(error) => {
                        if let Ok(mut state) = self.lock_state() {
                            state.in_use -= 1;
                        }
                        self.inner.available.notify_one();
                        Err(error)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ConnectorError::ConnectionUnavailable {
                    source_name: self.source_name().to_string(),
                    waited_ms: config.max_wait.as_millis() as u64,
                });
            }
            state = self
                .inner
                .available
                .wait_timeout(state, deadline - now)
                .map_err(|_| poisoned(self.source_name()))?
                .0;
        }
    }

    /// Refuse further acquires and close all idle connections. Connections
    /// currently in use are closed as they are released.
    pub fn shutdown(&self) {
        let drained: Vec<IdleConnection> = match self.lock_state() {
            Ok(mut state) => {
                state.shutdown = true;
                state.idle.drain(..).collect()
            }
            Err(_) => Vec::new(),
        };
        for mut idle in drained {
            idle.connection.close();
        }
        self.inner.available.notify_all();
        info!(source = self.source_name(), "connection pool shut down");
    }

    pub fn in_use_count(&self) -> usize {
        self.lock_state().map(|state| state.in_use).unwrap_or(0)
    }

    pub fn idle_count(&self) -> usize {
        self.lock_state().map(|state| state.idle.len()).unwrap_or(0)
    }

    /// Connections opened over the pool's lifetime.
    pub fn total_connections_created(&self) -> u64 {
        self.inner.total_created.load(Ordering::Relaxed)
    }

    /// Successful acquires over the pool's lifetime.
    pub fn total_connections_used(&self) -> u64 {
        self.inner.total_used.load(Ordering::Relaxed)
    }

    fn connect_with_retries(&self) -> ConnectorResult<Box<dyn Connection>> {
        let config = &self.inner.config;
        let tolerated = config.max_failed_attempts.max(self.inner.source.retry_limit());
        let mut failures = 0u32;
        loop {
            match self.inner.source.connect() {
                Ok(connection) => {
                    self.inner.total_created.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        source = self.source_name(),
                        total = self.inner.total_created.load(Ordering::Relaxed),
                        "opened connection"
                    );
                    return Ok(connection);
                }
                Err(error) => {
                    failures += 1;
                    if failures > tolerated {
                        return Err(ConnectorError::SourceUnavailable {
                            source_name: self.source_name().to_string(),
                            attempts: failures,
                            reason: error.to_string(),
                        });
                    }
                    // Brief jittered pause, bounded by the ping timeout.
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(1..=10));
                    std::thread::sleep(jitter.min(config.ping_timeout));
                }
            }
        }
    }

    fn release(&self, connection: Box<dyn Connection>) {
        let mut connection = connection;
        match self.lock_state() {
            Ok(mut state) => {
                state.in_use = state.in_use.saturating_sub(1);
                if state.shutdown {
                    drop(state);
                    connection.close();
                } else {
                    state.idle.push_back(IdleConnection {
                        connection,
                        since: Instant::now(),
                    });
                }
            }
            Err(_) => connection.close(),
        }
        self.inner.available.notify_one();
    }

    fn lock_state(&self) -> ConnectorResult<MutexGuard<'_, PoolState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| poisoned(self.source_name()))
    }
}

fn poisoned(source: &str) -> ConnectorError {
    ConnectorError::Connector(format!("pool lock poisoned for source {source:?}"))
}

/// A pooled connection, returned to its pool on drop.
///
/// Derefs to the underlying [`Connection`], so requests are executed
/// directly on the guard.
pub struct PooledConnection {
    pool: ConnectionPool,
    connection: Option<Box<dyn Connection>>,
}

impl PooledConnection {
    fn new(pool: ConnectionPool, connection: Box<dyn Connection>) -> Self {
        Self {
            pool,
            connection: Some(connection),
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection_present", &self.connection.is_some())
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_deref()
            .expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_deref_mut()
            .expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::traits::Capabilities;
    use arbor_requests::Request;
    use std::sync::atomic::{AtomicBool, AtomicU32};

    struct StubConnection {
        source: String,
        alive: Arc<AtomicBool>,
    }

    impl Connection for StubConnection {
        fn source_name(&self) -> &str {
            &self.source
        }

        fn execute(
            &mut self,
            _context: &ExecutionContext,
            _request: &mut Request,
        ) -> ConnectorResult<()> {
            Ok(())
        }

        fn ping(&self, _timeout: Duration) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    struct StubSource {
        name: String,
        connects: AtomicU32,
        fail_connects: AtomicU32,
        /// Liveness flag of every connection opened so far, in open order.
        spawned: Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl StubSource {
        fn new(name: &str) -> Self {
            Self {
                name: name.into(),
                connects: AtomicU32::new(0),
                fail_connects: AtomicU32::new(0),
                spawned: Mutex::new(Vec::new()),
            }
        }

        fn kill_connection(&self, index: usize) {
            self.spawned.lock().unwrap()[index].store(false, Ordering::SeqCst);
        }
    }

    impl Source for StubSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::writable_tree()
        }

        fn connect(&self) -> ConnectorResult<Box<dyn Connection>> {
            if self.fail_connects.load(Ordering::SeqCst) > 0 {
                self.fail_connects.fetch_sub(1, Ordering::SeqCst);
                return Err(ConnectorError::Connector("simulated connect failure".into()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            let alive = Arc::new(AtomicBool::new(true));
            self.spawned.lock().unwrap().push(Arc::clone(&alive));
            Ok(Box::new(StubConnection {
                source: self.name.clone(),
                alive,
            }))
        }

        fn default_workspace(&self) -> &str {
            "default"
        }
    }

    fn pool_with(source: Arc<StubSource>, config: PoolConfig) -> ConnectionPool {
        ConnectionPool::new(source, config).unwrap()
    }

    // -----------------------------------------------------------------------
    // Configuration validation
    // -----------------------------------------------------------------------

    #[test]
    fn zero_max_size_is_rejected() {
        let source = Arc::new(StubSource::new("mem"));
        let config = PoolConfig {
            max_size: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(
            ConnectionPool::new(source, config),
            Err(ConnectorError::Validation(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Acquire / release
    // -----------------------------------------------------------------------

    #[test]
    fn released_connections_are_reused() {
        let source = Arc::new(StubSource::new("mem"));
        let pool = pool_with(Arc::clone(&source), PoolConfig::default());

        drop(pool.acquire().unwrap());
        drop(pool.acquire().unwrap());

        assert_eq!(source.connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.total_connections_created(), 1);
        assert_eq!(pool.total_connections_used(), 2);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.in_use_count(), 0);
    }

    #[test]
    fn exhausted_pool_times_out() {
        let source = Arc::new(StubSource::new("mem"));
        let config = PoolConfig {
            max_size: 1,
            max_wait: Duration::from_millis(20),
            ..PoolConfig::default()
        };
        let pool = pool_with(source, config);

        let held = pool.acquire().unwrap();
        let error = pool.acquire().unwrap_err();
        assert!(matches!(
            error,
            ConnectorError::ConnectionUnavailable { .. }
        ));
        drop(held);
        // A released connection satisfies the next acquire.
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn waiting_acquire_is_woken_by_release() {
        let source = Arc::new(StubSource::new("mem"));
        let config = PoolConfig {
            max_size: 1,
            max_wait: Duration::from_secs(5),
            ..PoolConfig::default()
        };
        let pool = pool_with(source, config);

        let held = pool.acquire().unwrap();
        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.acquire().map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        waiter.join().unwrap().unwrap();
    }

    // -----------------------------------------------------------------------
    // Validation before reuse
    // -----------------------------------------------------------------------

    #[test]
    fn failed_ping_discards_the_connection() {
        let source = Arc::new(StubSource::new("mem"));
        let config = PoolConfig {
            validate_before_use: true,
            ..PoolConfig::default()
        };
        let pool = pool_with(Arc::clone(&source), config);

        drop(pool.acquire().unwrap());
        assert_eq!(pool.idle_count(), 1);

        // The idle connection dies; the next acquire discards it and opens
        // a fresh one.
        source.kill_connection(0);
        drop(pool.acquire().unwrap());
        assert_eq!(source.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn live_idle_connection_passes_validation_and_is_reused() {
        let source = Arc::new(StubSource::new("mem"));
        let config = PoolConfig {
            validate_before_use: true,
            ..PoolConfig::default()
        };
        let pool = pool_with(Arc::clone(&source), config);

        drop(pool.acquire().unwrap());
        drop(pool.acquire().unwrap());
        assert_eq!(source.connects.load(Ordering::SeqCst), 1);
    }

    // -----------------------------------------------------------------------
    // Keep-alive
    // -----------------------------------------------------------------------

    #[test]
    fn idle_past_keep_alive_is_closed() {
        let source = Arc::new(StubSource::new("mem"));
        let config = PoolConfig {
            keep_alive: Duration::from_millis(5),
            ..PoolConfig::default()
        };
        let pool = pool_with(Arc::clone(&source), config);

        drop(pool.acquire().unwrap());
        std::thread::sleep(Duration::from_millis(15));
        drop(pool.acquire().unwrap());
        // The stale idle was closed and a second connection opened.
        assert_eq!(source.connects.load(Ordering::SeqCst), 2);
    }

    // -----------------------------------------------------------------------
    // Connect retries
    // -----------------------------------------------------------------------

    #[test]
    fn transient_connect_failures_are_retried() {
        let source = Arc::new(StubSource::new("mem"));
        source.fail_connects.store(2, Ordering::SeqCst);
        let config = PoolConfig {
            max_failed_attempts: 3,
            ping_timeout: Duration::from_millis(1),
            ..PoolConfig::default()
        };
        let pool = pool_with(Arc::clone(&source), config);

        assert!(pool.acquire().is_ok());
        assert_eq!(source.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exceeding_the_failure_limit_is_fatal() {
        let source = Arc::new(StubSource::new("mem"));
        source.fail_connects.store(10, Ordering::SeqCst);
        let config = PoolConfig {
            max_failed_attempts: 2,
            ping_timeout: Duration::from_millis(1),
            ..PoolConfig::default()
        };
        let pool = pool_with(Arc::clone(&source), config);

        let error = pool.acquire().unwrap_err();
        match error {
            ConnectorError::SourceUnavailable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error {other}"),
        }
        // The failed slot was returned to the pool.
        assert_eq!(pool.in_use_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    #[test]
    fn shutdown_refuses_new_acquires() {
        let source = Arc::new(StubSource::new("mem"));
        let pool = pool_with(source, PoolConfig::default());
        drop(pool.acquire().unwrap());

        pool.shutdown();
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(
            pool.acquire(),
            Err(ConnectorError::PoolShutDown(_))
        ));
    }
}
