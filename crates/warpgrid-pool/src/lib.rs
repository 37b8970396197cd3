//! warpgrid-pool — bounded client connection pool for a single endpoint.
//!
//! Amortises connection setup across many short request/response exchanges:
//! callers lease a connection with [`Pool::get`], perform one exchange over
//! its transport, and hand it back with [`Pool::put`].
//!
//! # Architecture
//!
//! ```text
//! Pool (cloneable handle)
//!   ├── PoolState (one mutex)
//!   │   ├── used — leases outstanding
//!   │   └── FreeQueue — idle connections, capacity = max_size
//!   ├── Dialer — opens transports (TcpDialer by default)
//!   └── Reclaimer task — shrinks stale idle stock back to init_size
//! ```
//!
//! The wire protocol spoken over a connection is the caller's business; the
//! pool only opens transports through a [`Dialer`] and closes them through
//! [`ConnectionHandle`].

pub mod config;
pub mod connection;
pub mod dialer;
pub mod error;
pub mod pool;
pub mod queue;
pub mod reclaimer;

pub use config::PoolConfig;
pub use connection::Connection;
pub use dialer::{ConnectionHandle, DialError, Dialer, TcpDialer, TcpHandle};
pub use error::{PoolError, PoolResult};
pub use pool::{Pool, PoolStats};
pub use reclaimer::ReclaimerState;
