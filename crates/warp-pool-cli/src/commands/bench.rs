//! Load generator — many workers sharing one pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use warpgrid_pool::{Connection, Pool, PoolConfig, TcpDialer, TcpHandle};

/// Upper bound on one request/response exchange.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BenchOptions {
    pub server: String,
    pub config: Option<PathBuf>,
    pub init_size: usize,
    pub max_size: usize,
    pub requests: u64,
    pub concurrency: usize,
    pub dial_timeout: u64,
    pub idle_timeout: u64,
}

impl BenchOptions {
    fn pool_config(&self) -> anyhow::Result<PoolConfig> {
        match &self.config {
            Some(path) => PoolConfig::from_file(path),
            None => Ok(PoolConfig::new(self.server.as_str())
                .with_dial_timeout(Duration::from_secs(self.dial_timeout))
                .with_idle_timeout(Duration::from_secs(self.idle_timeout))
                .with_sizes(self.max_size, self.init_size)),
        }
    }
}

#[derive(Default)]
struct Counters {
    pending: AtomicI64,
    finished: AtomicU64,
    success: AtomicU64,
    call_failed: AtomicU64,
    pool_failed: AtomicU64,
}

pub async fn run(opts: BenchOptions) -> anyhow::Result<()> {
    let config = opts.pool_config()?;
    let pool = Pool::new(config, TcpDialer);
    let counters = Arc::new(Counters::default());
    counters
        .pending
        .store(i64::try_from(opts.requests)?, Ordering::SeqCst);

    println!("PID is {}", std::process::id());
    let started = Instant::now();

    let workers: Vec<_> = (0..opts.concurrency.max(1))
        .map(|worker| {
            let pool = pool.clone();
            let counters = Arc::clone(&counters);
            tokio::spawn(async move { worker_loop(worker, pool, counters).await })
        })
        .collect();
    for handle in workers {
        handle.await?;
    }

    let elapsed = started.elapsed();
    let finished = counters.finished.load(Ordering::SeqCst);
    println!("Elapsed: {elapsed:?}");
    println!("Finished: {finished}");
    println!("Success: {}", counters.success.load(Ordering::SeqCst));
    println!("Call failed: {}", counters.call_failed.load(Ordering::SeqCst));
    println!("Pool failed: {}", counters.pool_failed.load(Ordering::SeqCst));
    if finished > 0 && !elapsed.is_zero() {
        println!("QPS: {:.1}", finished as f64 / elapsed.as_secs_f64());
    }

    let stats = pool.stats();
    println!(
        "Pool: used={} idle={} dialed={} reused={} evicted={} exhausted={}",
        stats.used,
        stats.idle,
        stats.dialed,
        stats.reused,
        stats.evicted_stale + stats.evicted_overflow,
        stats.exhausted,
    );
    pool.log_stats();
    pool.close();
    Ok(())
}

async fn worker_loop(worker: usize, pool: Pool<TcpDialer>, counters: Arc<Counters>) {
    loop {
        if counters.pending.fetch_sub(1, Ordering::SeqCst) <= 0 {
            break;
        }
        let seq = counters.finished.fetch_add(1, Ordering::SeqCst);

        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                counters.pool_failed.fetch_add(1, Ordering::SeqCst);
                debug!(worker, error = %e, "pool get failed");
                continue;
            }
        };

        let msg = format!("worker {worker} request {seq}");
        match tokio::time::timeout(EXCHANGE_TIMEOUT, exchange(&mut conn, &msg)).await {
            Ok(Ok(reply)) if reply == msg => {
                counters.success.fetch_add(1, Ordering::SeqCst);
            }
            outcome => {
                counters.call_failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker, ?outcome, "echo exchange failed");
                // A half-finished exchange leaves the stream unusable.
                if let Err(e) = conn.close() {
                    debug!(worker, error = %e, "close after failed exchange");
                }
            }
        }

        if let Err(e) = pool.put(conn) {
            warn!(worker, error = %e, "returning connection failed");
        }
    }
}

async fn exchange(conn: &mut Connection<TcpHandle>, msg: &str) -> std::io::Result<String> {
    let stream = conn
        .handle_mut()
        .stream_mut()
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))?;
    stream.write_all(msg.as_bytes()).await?;
    stream.write_all(b"\n").await?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
    }
    Ok(line.trim_end().to_string())
}
