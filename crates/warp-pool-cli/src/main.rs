use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "warp-pool",
    about = "WarpGrid connection pool driver",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a line-echo TCP server to act as the pooled endpoint
    Echo {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:9898")]
        listen: String,
    },
    /// Drive request/response exchanges through a shared connection pool.
    ///
    /// Pool settings come from --config (a pool.toml with a [pool] table)
    /// when given, otherwise from the flags below.
    Bench {
        /// Endpoint to connect to
        #[arg(short, long, default_value = "127.0.0.1:9898")]
        server: String,
        /// pool.toml to read pool settings from
        #[arg(long)]
        config: Option<PathBuf>,
        /// Initial size of the pool
        #[arg(long, default_value_t = 1)]
        init_size: usize,
        /// Maximum size of the pool
        #[arg(long, default_value_t = 100)]
        max_size: usize,
        /// Number of requests to perform
        #[arg(short = 'n', long, default_value_t = 1)]
        requests: u64,
        /// Number of concurrent workers
        #[arg(short = 'c', long, default_value_t = 1)]
        concurrency: usize,
        /// Dial timeout in seconds
        #[arg(long, default_value_t = 5)]
        dial_timeout: u64,
        /// Idle timeout in seconds
        #[arg(long, default_value_t = 5)]
        idle_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warp_pool=info".parse()?)
                .add_directive("warpgrid_pool=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Echo { listen } => commands::echo::serve(&listen).await,
        Commands::Bench {
            server,
            config,
            init_size,
            max_size,
            requests,
            concurrency,
            dial_timeout,
            idle_timeout,
        } => {
            let opts = commands::bench::BenchOptions {
                server,
                config,
                init_size,
                max_size,
                requests,
                concurrency,
                dial_timeout,
                idle_timeout,
            };
            commands::bench::run(opts).await
        }
    }
}
