//! Pool — lease, return, probe and shutdown for one endpoint.
//!
//! # Architecture
//!
//! ```text
//! get()
//!   → closed?              → PoolError::Closed
//!   → free queue hit       → lease the idle connection
//!   → used + 1 > max_size  → PoolError::Exhausted
//!   → dial outside the lock → lease the new connection
//!
//! put(conn)
//!   → pool closed / conn closed → close or drop, Ok
//!   → idle > init_size and stale or over capacity → evict, Ok
//!   → enqueue-if-open      → queued, or closed on Full / Closed
//! ```
//!
//! `used`, the free queue (its length is the idle count) and the counters
//! share one mutex. Dialing and closing handles never happen under it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{MIN_TIMEOUT, PoolConfig};
use crate::connection::Connection;
use crate::dialer::{ConnectionHandle, DialError, Dialer};
use crate::error::{PoolError, PoolResult};
use crate::queue::{FreeQueue, PushError};
use crate::reclaimer::{self, ReclaimerState};

/// Pool-level counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently leased out.
    pub used: usize,
    /// Connections sitting in the free queue.
    pub idle: usize,
    /// Connections created by the dialer.
    pub dialed: u64,
    /// Leases served from the free queue.
    pub reused: u64,
    /// Connections closed for exceeding the idle timeout.
    pub evicted_stale: u64,
    /// Connections closed because the pool already held `max_size` idle.
    pub evicted_overflow: u64,
    /// `get` calls rejected by admission control.
    pub exhausted: u64,
}

/// How a connection comes back into the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Checkin {
    /// End of a lease: releases `used` and refreshes `last_used`.
    Lease,
    /// Reclaimer probe: `used` untouched, the idle clock keeps running.
    Probe,
}

/// What happened to a connection handed back to the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Returned {
    Queued,
    Evicted,
    Discarded,
}

struct PoolState<H: ConnectionHandle> {
    used: usize,
    queue: FreeQueue<Connection<H>>,
    dialed: u64,
    reused: u64,
    evicted_stale: u64,
    evicted_overflow: u64,
    exhausted: u64,
}

pub(crate) struct PoolInner<D: Dialer> {
    endpoint: Arc<str>,
    max_size: usize,
    init_size: usize,
    dial_timeout_ms: AtomicU64,
    idle_timeout_ms: AtomicU64,
    /// Unix millis of the last `get`/`put`; zero until the first call.
    last_activity_ms: AtomicU64,
    closed: AtomicBool,
    state: Mutex<PoolState<D::Handle>>,
    dialer: D,
    shutdown_tx: watch::Sender<bool>,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

/// A bounded pool of reusable connections to a single endpoint.
///
/// `Pool` is a cheap handle: clone it to share the pool between tasks.
/// Leases are taken with [`get`](Pool::get) and must be handed back with
/// [`put`](Pool::put), even when the caller closed the connection after a
/// failed exchange.
pub struct Pool<D: Dialer> {
    inner: Arc<PoolInner<D>>,
}

impl<D: Dialer> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Non-owning pool reference held by the reclaimer.
pub(crate) struct WeakPool<D: Dialer>(Weak<PoolInner<D>>);

impl<D: Dialer> WeakPool<D> {
    pub(crate) fn upgrade(&self) -> Option<Pool<D>> {
        self.0.upgrade().map(|inner| Pool { inner })
    }
}

/// Rolls back an admission slot unless the dial produced a connection.
///
/// Also covers a `get` future dropped mid-dial.
struct Admission<'a, D: Dialer> {
    pool: &'a Pool<D>,
    armed: bool,
}

impl<D: Dialer> Drop for Admission<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.pool.state();
            state.used = state.used.saturating_sub(1);
        }
    }
}

impl<D: Dialer> Pool<D> {
    /// Create a pool and start its idle reclaimer on the current tokio runtime.
    ///
    /// Never fails: `config` is normalised first. Without a runtime the pool
    /// still works, but idle connections are only reclaimed through
    /// [`reclaim_idle`](Pool::reclaim_idle).
    pub fn new(config: PoolConfig, dialer: D) -> Self {
        let config = config.normalized();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(PoolInner {
            endpoint: Arc::from(config.endpoint.as_str()),
            max_size: config.max_size,
            init_size: config.init_size,
            dial_timeout_ms: AtomicU64::new(millis(config.dial_timeout)),
            idle_timeout_ms: AtomicU64::new(millis(config.idle_timeout)),
            last_activity_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            state: Mutex::new(PoolState {
                used: 0,
                queue: FreeQueue::with_capacity(config.max_size),
                dialed: 0,
                reused: 0,
                evicted_stale: 0,
                evicted_overflow: 0,
                exhausted: 0,
            }),
            dialer,
            shutdown_tx,
            reclaimer: Mutex::new(None),
        });

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let weak = WeakPool(Arc::downgrade(&inner));
                let handle = runtime.spawn(reclaimer::run(weak, config.reclaim_interval, shutdown_rx));
                *inner.reclaimer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(_) => {
                warn!(
                    endpoint = %config.endpoint,
                    "no tokio runtime, idle reclaimer disabled"
                );
            }
        }

        info!(
            endpoint = %config.endpoint,
            max_size = config.max_size,
            init_size = config.init_size,
            dial_timeout = ?config.dial_timeout,
            idle_timeout = ?config.idle_timeout,
            "connection pool created"
        );

        Self { inner }
    }

    fn state(&self) -> MutexGuard<'_, PoolState<D::Handle>> {
        // The state is plain counters and a deque, still consistent after a panic.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch_activity(&self) {
        self.inner.last_activity_ms.store(epoch_millis(), Ordering::Relaxed);
    }

    // ── Leases ───────────────────────────────────────────────────────

    /// Lease a connection.
    ///
    /// Returns an idle connection when one is queued, otherwise dials a new
    /// one if admission control allows it. Never waits for another caller's
    /// `put`.
    pub async fn get(&self) -> PoolResult<Connection<D::Handle>> {
        self.touch_activity();

        {
            let mut state = self.state();
            if state.queue.is_closed() {
                return Err(PoolError::Closed);
            }

            let used = state.used + 1;
            if let Some(conn) = state.queue.try_pop() {
                state.used = used;
                state.reused += 1;
                debug!(
                    endpoint = %self.inner.endpoint,
                    used = used,
                    idle = state.queue.len(),
                    "reused idle connection"
                );
                return Ok(conn);
            }

            if used > self.inner.max_size {
                state.exhausted += 1;
                debug!(
                    endpoint = %self.inner.endpoint,
                    used = used,
                    max = self.inner.max_size,
                    "connection pool exhausted"
                );
                return Err(PoolError::Exhausted {
                    used,
                    max: self.inner.max_size,
                });
            }
            state.used = used;
        }

        let mut admission = Admission {
            pool: self,
            armed: true,
        };

        let timeout = self.dial_timeout();
        let timeout = (!timeout.is_zero()).then_some(timeout);
        let handle = self
            .inner
            .dialer
            .dial(&self.inner.endpoint, timeout)
            .await
            .map_err(|e| {
                let endpoint = self.inner.endpoint.to_string();
                debug!(endpoint = %endpoint, error = %e, "dial failed");
                match e {
                    DialError::Dial(reason) => PoolError::DialFailed { endpoint, reason },
                    DialError::Open(reason) => PoolError::OpenFailed { endpoint, reason },
                }
            })?;

        admission.armed = false;
        let used = {
            let mut state = self.state();
            state.dialed += 1;
            state.used
        };
        debug!(endpoint = %self.inner.endpoint, used = used, "dialed new connection");

        Ok(Connection::new(Arc::clone(&self.inner.endpoint), handle))
    }

    /// Return a leased connection.
    ///
    /// The connection is queued for reuse, evicted by the idle policy, or
    /// closed if the pool has shut down. Only `QueueFull` is reported as an
    /// error, and the connection is closed in that case as well.
    pub fn put(&self, conn: Connection<D::Handle>) -> PoolResult<()> {
        self.touch_activity();
        self.checkin(conn, Checkin::Lease).map(|_| ())
    }

    // ── Probe ────────────────────────────────────────────────────────

    /// Take the oldest idle connection without leasing it.
    ///
    /// Never dials and leaves `used` untouched. Pair with
    /// [`return_or_evict`](Pool::return_or_evict).
    pub fn try_take_idle(&self) -> Option<Connection<D::Handle>> {
        self.state().queue.try_pop()
    }

    /// Hand back a probed connection, re-applying the eviction policy.
    ///
    /// Unlike `put` this does not refresh the connection's idle clock.
    pub fn return_or_evict(&self, conn: Connection<D::Handle>) -> PoolResult<()> {
        self.checkin(conn, Checkin::Probe).map(|_| ())
    }

    fn checkin(&self, mut conn: Connection<D::Handle>, mode: Checkin) -> PoolResult<Returned> {
        let now = Instant::now();
        let idle_timeout = self.idle_timeout();
        let init_size = self.inner.init_size;
        let max_size = self.inner.max_size;

        // `close` may land between this read and the push below, in which
        // case the queue refuses the connection instead.
        let pool_closed = self.is_closed();

        let mut state = self.state();
        if mode == Checkin::Lease {
            state.used = state.used.saturating_sub(1);
        }

        if pool_closed {
            drop(state);
            if !conn.is_closed() {
                self.close_quietly(conn, "pool closed");
            }
            return Ok(Returned::Discarded);
        }
        if conn.is_closed() {
            return Ok(Returned::Discarded);
        }

        // Staleness is judged against the previous timestamp, before a lease
        // refreshes it.
        let last_used = conn.last_used();
        let idle = state.queue.len() + 1;
        if mode == Checkin::Lease {
            conn.touch(now);
        }

        if idle > init_size {
            if now.saturating_duration_since(last_used) > idle_timeout {
                state.evicted_stale += 1;
                drop(state);
                self.close_quietly(conn, "idle timeout");
                return Ok(Returned::Evicted);
            }
            if idle > max_size {
                state.evicted_overflow += 1;
                drop(state);
                self.close_quietly(conn, "over capacity");
                return Ok(Returned::Evicted);
            }
        }

        let pushed = state.queue.try_push(conn);
        match pushed {
            Ok(()) => Ok(Returned::Queued),
            Err(PushError::Closed(conn)) => {
                drop(state);
                self.close_quietly(conn, "queue closed");
                Ok(Returned::Discarded)
            }
            Err(PushError::Full(conn)) => {
                let used = state.used;
                let idle = state.queue.len();
                drop(state);
                self.close_quietly(conn, "queue full");
                warn!(
                    endpoint = %self.inner.endpoint,
                    used = used,
                    init = init_size,
                    idle = idle,
                    "free queue full, connection discarded"
                );
                Err(PoolError::QueueFull {
                    used,
                    init: init_size,
                    idle,
                })
            }
        }
    }

    fn close_quietly(&self, mut conn: Connection<D::Handle>, reason: &'static str) {
        if let Err(e) = conn.close() {
            debug!(endpoint = %self.inner.endpoint, reason = reason, error = %e, "close failed");
        }
        debug!(endpoint = %self.inner.endpoint, reason = reason, "closed pooled connection");
    }

    // ── Reclaim ──────────────────────────────────────────────────────

    /// Run one reclaimer pass and return how many connections were evicted.
    ///
    /// Only acts when more than `init_size` connections are idle and fewer
    /// are leased than idle. Each idle connection is probed once: stale ones
    /// are closed until the idle count is back at `init_size`, fresh ones go
    /// back to the queue unchanged.
    pub fn reclaim_idle(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        let (idle, used) = {
            let state = self.state();
            (state.queue.len(), state.used)
        };
        if idle <= self.inner.init_size || used >= idle {
            return 0;
        }

        let mut evicted = 0;
        for _ in 0..idle {
            let Some(conn) = self.try_take_idle() else {
                break;
            };
            match self.checkin(conn, Checkin::Probe) {
                Ok(Returned::Evicted) => evicted += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(endpoint = %self.inner.endpoint, error = %e, "reclaimer failed to return idle connection");
                }
            }
        }
        evicted
    }

    /// Whether the background reclaimer task is still running.
    pub fn reclaimer_state(&self) -> ReclaimerState {
        let reclaimer = self.inner.reclaimer.lock().unwrap_or_else(PoisonError::into_inner);
        match reclaimer.as_ref() {
            Some(handle) if !handle.is_finished() => ReclaimerState::Running,
            _ => ReclaimerState::Stopped,
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Shut the pool down.
    ///
    /// Runs once; later calls return immediately. Queued connections are
    /// closed now, leased ones when their owner calls `put`. Does not wait
    /// for outstanding leases.
    pub fn close(&self) {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let (drained, used) = {
            let mut state = self.state();
            (state.queue.close(), state.used)
        };
        self.inner.shutdown_tx.send_replace(true);

        let closed = drained.len();
        for conn in drained {
            self.close_quietly(conn, "pool shutdown");
        }

        info!(
            endpoint = %self.inner.endpoint,
            closed = closed,
            outstanding = used,
            "connection pool closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// Connections currently leased out.
    pub fn used(&self) -> usize {
        self.state().used
    }

    /// Connections currently sitting in the free queue.
    pub fn idle(&self) -> usize {
        self.state().queue.len()
    }

    pub fn init_size(&self) -> usize {
        self.inner.init_size
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Time of the most recent `get` or `put`, if any.
    pub fn last_activity(&self) -> Option<SystemTime> {
        match self.inner.last_activity_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.dial_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.idle_timeout_ms.load(Ordering::Relaxed))
    }

    /// Change the idle timeout; values under one second become one second.
    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.inner
            .idle_timeout_ms
            .store(millis(timeout.max(MIN_TIMEOUT)), Ordering::Relaxed);
    }

    /// Change the dial timeout; values under one second become one second.
    pub fn set_dial_timeout(&self, timeout: Duration) {
        self.inner
            .dial_timeout_ms
            .store(millis(timeout.max(MIN_TIMEOUT)), Ordering::Relaxed);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state();
        PoolStats {
            used: state.used,
            idle: state.queue.len(),
            dialed: state.dialed,
            reused: state.reused,
            evicted_stale: state.evicted_stale,
            evicted_overflow: state.evicted_overflow,
            exhausted: state.exhausted,
        }
    }

    /// Log pool statistics at `tracing::info` level.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            endpoint = %self.inner.endpoint,
            used = stats.used,
            idle = stats.idle,
            dialed = stats.dialed,
            reused = stats.reused,
            evicted_stale = stats.evicted_stale,
            evicted_overflow = stats.evicted_overflow,
            exhausted = stats.exhausted,
            "pool statistics"
        );
    }
}

impl<D: Dialer> std::fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("endpoint", &self.inner.endpoint)
            .field("max_size", &self.inner.max_size)
            .field("init_size", &self.inner.init_size)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(millis)
        .unwrap_or_default()
}
