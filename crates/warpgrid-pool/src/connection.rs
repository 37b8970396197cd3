//! A single pooled link to the endpoint.

use std::sync::Arc;

use tokio::time::Instant;

use crate::dialer::ConnectionHandle;
use crate::error::PoolResult;

/// One leased-or-idle connection.
///
/// Owned by exactly one actor at a time: the caller while leased, the pool
/// while queued. Returning it with [`Pool::put`](crate::Pool::put) moves it
/// back, so it cannot be queued twice or used after return.
#[derive(Debug)]
pub struct Connection<H: ConnectionHandle> {
    endpoint: Arc<str>,
    handle: H,
    last_used: Instant,
    closed: bool,
}

impl<H: ConnectionHandle> Connection<H> {
    pub(crate) fn new(endpoint: Arc<str>, handle: H) -> Self {
        Self {
            endpoint,
            handle,
            last_used: Instant::now(),
            closed: false,
        }
    }

    /// Address this connection was dialed to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    /// When the connection was created or last returned with `put`.
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_used = now;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the underlying transport.
    ///
    /// Idempotent: the handle is closed at most once, later calls return `Ok`.
    /// A caller that closes a connection after a failed exchange should still
    /// `put` it so the pool releases its lease. A transport error surfaces
    /// as [`PoolError::Close`](crate::PoolError::Close); the connection still
    /// counts as closed.
    pub fn close(&mut self) -> PoolResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.handle.close()?;
        Ok(())
    }
}
