//! Backend-agnostic connection pool primitive, reused by every concrete
//! [`super::Connector`] (spec §9 "factor shared plumbing into one place",
//! mirroring this workspace's habit of sharing [`crate::barrier::Barrier`]
//! across secrets engines).
//!
//! Acquisition is gated by a [`tokio::sync::Semaphore`] sized to the pool's
//! max capacity; idle connections live in a plain [`std::sync::Mutex`]-backed
//! queue so a checked-out connection can return itself to the pool from a
//! synchronous [`Drop`] impl without needing an async runtime handle at drop
//! time.

use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::connector::PoolMetrics;
use crate::error::ConnectorError;

struct Counters {
    total_ops: AtomicU64,
    failed_ops: AtomicU64,
    /// EMA of op duration in microseconds, fixed-point (×1000) to avoid
    /// storing a float in an atomic.
    ema_duration_micros_x1000: AtomicU64,
    created_count: AtomicU64,
    created_at: Instant,
}

/// A semaphore-bounded pool of backend connections of type `T`.
pub struct Pool<T: Send + 'static> {
    semaphore: Arc<Semaphore>,
    idle: Arc<StdMutex<VecDeque<T>>>,
    min_size: usize,
    max_size: usize,
    counters: Arc<Counters>,
}

/// A checked-out connection; returns itself to the idle queue on drop.
pub struct PooledConn<T: Send + 'static> {
    inner: Option<T>,
    idle: Arc<StdMutex<VecDeque<T>>>,
    _permit: OwnedSemaphorePermit,
}

impl<T: Send + 'static> Deref for PooledConn<T> {
    type Target = T;
    fn deref(&self) -> &T {
        #[allow(clippy::unwrap_used)]
        self.inner.as_ref().unwrap()
    }
}

impl<T: Send + 'static> DerefMut for PooledConn<T> {
    fn deref_mut(&mut self) -> &mut T {
        #[allow(clippy::unwrap_used)]
        self.inner.as_mut().unwrap()
    }
}

impl<T: Send + 'static> Drop for PooledConn<T> {
    fn drop(&mut self) {
        if let Some(conn) = self.inner.take() {
            if let Ok(mut idle) = self.idle.lock() {
                idle.push_back(conn);
            }
        }
    }
}

impl<T: Send + 'static> PooledConn<T> {
    /// Consume the wrapper without returning the connection to the pool —
    /// used when the connection is known to be broken and should be
    /// dropped rather than recycled.
    pub fn discard(mut self) {
        self.inner.take();
    }
}

impl<T: Send + 'static> Pool<T> {
    #[must_use]
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_size.max(1))),
            idle: Arc::new(StdMutex::new(VecDeque::new())),
            min_size,
            max_size: max_size.max(1),
            counters: Arc::new(Counters {
                total_ops: AtomicU64::new(0),
                failed_ops: AtomicU64::new(0),
                ema_duration_micros_x1000: AtomicU64::new(0),
                created_count: AtomicU64::new(0),
                created_at: Instant::now(),
            }),
        }
    }

    /// Acquire a connection, blocking up to `op_timeout` for a free permit.
    /// Reuses an idle connection if one exists; otherwise calls `factory` to
    /// create a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::ConnectionTimeout`] if no permit becomes
    /// available within `op_timeout`; propagates `factory`'s error
    /// otherwise.
    pub async fn acquire<F, Fut>(
        &self,
        op_timeout: Duration,
        factory: F,
    ) -> Result<PooledConn<T>, ConnectorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ConnectorError>>,
    {
        let permit = tokio::time::timeout(op_timeout, Arc::clone(&self.semaphore).acquire_owned())
            .await
            .map_err(|_| ConnectorError::ConnectionTimeout {
                timeout_secs: op_timeout.as_secs(),
            })?
            .map_err(|_| ConnectorError::Unknown {
                reason: "pool semaphore closed".to_owned(),
            })?;

        let existing = self.idle.lock().ok().and_then(|mut q| q.pop_front());
        let conn = match existing {
            Some(conn) => conn,
            None => {
                self.counters.created_count.fetch_add(1, Ordering::Relaxed);
                factory().await?
            }
        };

        Ok(PooledConn {
            inner: Some(conn),
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    /// Record the outcome and duration of an operation for [`PoolMetrics`].
    pub fn record_op(&self, succeeded: bool, duration: Duration) {
        self.counters.total_ops.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.counters.failed_ops.fetch_add(1, Ordering::Relaxed);
        }
        let sample = (duration.as_micros() as u64).saturating_mul(1000);
        let prev = self.counters.ema_duration_micros_x1000.load(Ordering::Relaxed);
        // Exponential moving average with alpha = 0.2, fixed-point.
        let next = if prev == 0 {
            sample
        } else {
            (prev * 4 + sample) / 5
        };
        self.counters
            .ema_duration_micros_x1000
            .store(next, Ordering::Relaxed);
    }

    /// Current pool statistics (spec §3 `PoolMetrics`).
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let active = self.max_size - self.semaphore.available_permits();
        let idle = self.idle.lock().map(|q| q.len()).unwrap_or(0);
        PoolMetrics {
            total_ops: self.counters.total_ops.load(Ordering::Relaxed),
            failed_ops: self.counters.failed_ops.load(Ordering::Relaxed),
            avg_op_duration_micros: self
                .counters
                .ema_duration_micros_x1000
                .load(Ordering::Relaxed)
                / 1000,
            active_connections: active,
            idle_connections: idle,
            max_connections: self.max_size,
            min_connections: self.min_size,
            created_at: self.counters.created_at.elapsed(),
        }
    }
}
