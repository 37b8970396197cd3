//! Idle reclaimer — background task shrinking excess idle capacity.
//!
//! One task per pool. Every `reclaim_interval` it runs
//! [`Pool::reclaim_idle`](crate::Pool::reclaim_idle). It stops for good once
//! the pool is closed or every `Pool` handle has been dropped.

use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::dialer::Dialer;
use crate::pool::WeakPool;

/// Lifecycle of a pool's reclaimer task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclaimerState {
    Running,
    /// Terminal; a pool never restarts its reclaimer.
    Stopped,
}

pub(crate) async fn run<D: Dialer>(
    pool: WeakPool<D>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(interval = ?interval, "idle reclaimer starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                if pool.is_closed() {
                    break;
                }
                let evicted = pool.reclaim_idle();
                if evicted > 0 {
                    debug!(
                        endpoint = %pool.endpoint(),
                        evicted = evicted,
                        idle = pool.idle(),
                        used = pool.used(),
                        "reclaimed idle connections"
                    );
                }
            }
            // Fires on close, or with an error once the pool is dropped.
            _ = shutdown.changed() => break,
        }
    }

    debug!("idle reclaimer stopped");
}
