//! Line-echo TCP server — stands in for the remote endpoint.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub async fn serve(listen: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, "echo server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                debug!(%peer, "accepted connection");
                tokio::spawn(async move {
                    if let Err(e) = echo_lines(socket).await {
                        warn!(%peer, error = %e, "echo connection failed");
                    }
                    debug!(%peer, "connection closed");
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("echo server shutting down");
                return Ok(());
            }
        }
    }
}

async fn echo_lines(socket: TcpStream) -> std::io::Result<()> {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        write.write_all(line.as_bytes()).await?;
        write.write_all(b"\n").await?;
    }
    Ok(())
}
