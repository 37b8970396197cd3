//! Transport capabilities the pool depends on.
//!
//! The pool never speaks the wire protocol itself. It only needs a way to
//! open a transport to its endpoint ([`Dialer`]) and a way to close one
//! ([`ConnectionHandle`]). [`TcpDialer`] is the default implementation over
//! plain TCP; tests and callers with other transports provide their own.

use std::fmt::Debug;
use std::io;
use std::net::Shutdown;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;

/// Failure to produce a transport.
#[derive(Debug, Error)]
pub enum DialError {
    /// Address resolution, socket construction or the dial deadline failed.
    #[error("{0}")]
    Dial(String),
    /// The transport was constructed but could not be opened.
    #[error("{0}")]
    Open(String),
}

/// Exclusive ownership of one open transport.
pub trait ConnectionHandle: Send + Debug + 'static {
    /// Close the underlying transport.
    ///
    /// [`Connection`](crate::Connection) guarantees this is called at most once.
    fn close(&mut self) -> io::Result<()>;
}

/// Factory for new transports to a single endpoint, injected into the pool.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Handle: ConnectionHandle;

    /// Open a transport to `endpoint`, giving up after `timeout` when set.
    async fn dial(&self, endpoint: &str, timeout: Option<Duration>) -> Result<Self::Handle, DialError>;
}

// ── TCP ──────────────────────────────────────────────────────────────

/// [`Dialer`] opening plain TCP streams.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    type Handle = TcpHandle;

    async fn dial(&self, endpoint: &str, timeout: Option<Duration>) -> Result<TcpHandle, DialError> {
        let connect = async {
            let addr = tokio::net::lookup_host(endpoint)
                .await
                .map_err(|e| DialError::Dial(format!("resolve: {e}")))?
                .next()
                .ok_or_else(|| DialError::Dial("resolve: no addresses".to_string()))?;
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| DialError::Open(format!("tcp connect {addr}: {e}")))?;
            Ok::<_, DialError>(stream)
        };

        let stream = match timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| DialError::Dial(format!("timed out after {limit:?}")))??,
            None => connect.await?,
        };

        stream
            .set_nodelay(true)
            .map_err(|e| DialError::Open(format!("set nodelay: {e}")))?;
        Ok(TcpHandle::new(stream))
    }
}

/// A TCP transport owned by one [`Connection`](crate::Connection).
#[derive(Debug)]
pub struct TcpHandle {
    stream: Option<TcpStream>,
}

impl TcpHandle {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// The open stream, or `None` once closed.
    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }
}

impl ConnectionHandle for TcpHandle {
    fn close(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        match stream.into_std()?.shutdown(Shutdown::Both) {
            // Peer already hung up.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_dialer_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut handle = TcpDialer
            .dial(&addr, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        handle.stream_mut().unwrap().write_all(b"ping").await.unwrap();

        assert_eq!(&accept.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn tcp_dialer_refused_is_open_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpDialer.dial(&addr, None).await.unwrap_err();
        assert!(matches!(err, DialError::Open(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn tcp_dialer_unresolvable_is_dial_error() {
        let err = TcpDialer
            .dial("not a valid endpoint", Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, DialError::Dial(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn tcp_handle_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let mut handle = TcpDialer.dial(&addr, None).await.unwrap();
        let _peer = accept.await.unwrap();

        handle.close().unwrap();
        assert!(handle.stream_mut().is_none());
        handle.close().unwrap();
    }
}
