//! Bounded connection pool.
//!
//! # Checkout
//!
//! ```text
//! acquire()
//!   → permit available?           yes → take it
//!                                 no  → count a wait, block up to connect_timeout
//!   → idle connection that pings? yes → reuse it
//!                                 no  → factory.connect()
//! ```
//!
//! A [`PooledConnection`] owns its semaphore permit. Dropping it returns the
//! connection to the idle list (unless it failed with a connection-level
//! error or the idle list is full) and then releases the permit, so release
//! happens on every exit path of the caller.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use matchgrid_core::PoolSettings;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::engine::{Connection, ConnectionFactory, EngineError, EngineResult};

/// Pool-level statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently checked out.
    pub active: usize,
    /// Connections sitting idle in the pool.
    pub idle: usize,
    /// Total connections (active + idle).
    pub total: usize,
    /// Number of checkouts that had to wait for a free slot.
    pub wait_count: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicUsize,
    wait_count: AtomicU64,
    next_handle: AtomicU64,
}

type IdleList = Arc<Mutex<Vec<Box<dyn Connection>>>>;

/// Bounded pool of engine connections shared by every store operation.
pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    semaphore: Arc<Semaphore>,
    idle: IdleList,
    counters: Arc<Counters>,
    connect_timeout: Duration,
    idle_max: usize,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Create a pool over `factory`. `settings.max_size` is raised to 1 if zero.
    pub fn new(factory: Arc<dyn ConnectionFactory>, settings: &PoolSettings) -> Self {
        Self {
            factory,
            semaphore: Arc::new(Semaphore::new(settings.max_size.max(1))),
            idle: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(Counters::default()),
            connect_timeout: settings.connect_timeout,
            idle_max: settings.idle_max,
        }
    }

    /// Check out a connection, waiting up to `connect_timeout` for a free slot.
    pub async fn acquire(&self) -> EngineResult<PooledConnection> {
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.counters.wait_count.fetch_add(1, Ordering::Relaxed);
                match tokio::time::timeout(
                    self.connect_timeout,
                    Arc::clone(&self.semaphore).acquire_owned(),
                )
                .await
                {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        return Err(EngineError::Connect("connection pool closed".to_string()));
                    }
                    Err(_) => {
                        return Err(EngineError::Connect(format!(
                            "connection pool exhausted (timeout: {:?})",
                            self.connect_timeout
                        )));
                    }
                }
            }
        };

        let handle = self.counters.next_handle.fetch_add(1, Ordering::Relaxed) + 1;

        while let Some(mut conn) = self.pop_idle() {
            if conn.ping() {
                debug!(handle, "reused idle connection from pool");
                return Ok(self.wrap(handle, conn, permit));
            }
            self.counters.total.fetch_sub(1, Ordering::Relaxed);
            debug!(handle, "discarded unhealthy idle connection");
        }

        // The permit is dropped on error, freeing the slot.
        let conn = self.factory.connect()?;
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        debug!(handle, "created new connection");
        Ok(self.wrap(handle, conn, permit))
    }

    pub fn stats(&self) -> PoolStats {
        let idle = lock_idle(&self.idle).len();
        let total = self.counters.total.load(Ordering::Relaxed);
        PoolStats {
            active: total.saturating_sub(idle),
            idle,
            total,
            wait_count: self.counters.wait_count.load(Ordering::Relaxed),
        }
    }

    fn pop_idle(&self) -> Option<Box<dyn Connection>> {
        lock_idle(&self.idle).pop()
    }

    fn wrap(
        &self,
        handle: u64,
        conn: Box<dyn Connection>,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection {
        PooledConnection {
            handle,
            conn: Some(conn),
            broken: false,
            idle: Arc::clone(&self.idle),
            idle_max: self.idle_max,
            counters: Arc::clone(&self.counters),
            _permit: permit,
        }
    }
}

fn lock_idle(idle: &IdleList) -> std::sync::MutexGuard<'_, Vec<Box<dyn Connection>>> {
    idle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connection checked out of a [`ConnectionPool`].
pub struct PooledConnection {
    handle: u64,
    conn: Option<Box<dyn Connection>>,
    broken: bool,
    idle: IdleList,
    idle_max: usize,
    counters: Arc<Counters>,
    // Released after `Drop::drop` has returned the connection.
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("handle", &self.handle)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// Run one or more commands on the connection. A connection-level error
    /// marks the connection broken so it is discarded on release.
    pub fn run<T>(
        &mut self,
        f: impl FnOnce(&mut dyn Connection) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let conn = self
            .conn
            .as_deref_mut()
            .ok_or_else(|| EngineError::Closed("connection already released".to_string()))?;
        let result = f(conn);
        if let Err(e) = &result {
            if e.is_connection_error() {
                self.broken = true;
            }
        }
        result
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !self.broken {
            let mut idle = lock_idle(&self.idle);
            if idle.len() < self.idle_max {
                idle.push(conn);
                debug!(handle = self.handle, idle_count = idle.len(), "returned connection to pool");
                return;
            }
        }
        self.counters.total.fetch_sub(1, Ordering::Relaxed);
        debug!(handle = self.handle, broken = self.broken, "closed connection on release");
    }
}
