use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use mock_backend::{router, spawn_publisher, BackendState, PublisherConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "In-memory parking backend with a random status feed")]
struct Args {
    #[arg(long, env = "MOCK_ADDR", default_value = "127.0.0.1:8000")]
    addr: SocketAddr,

    /// Milliseconds between publish rounds.
    #[arg(long, default_value_t = 3000)]
    interval_ms: u64,

    /// Spots touched per round.
    #[arg(long, default_value_t = 3)]
    batch: usize,

    /// Serve the seeded table without publishing changes.
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let state = BackendState::seeded();

    if !args.quiet {
        spawn_publisher(
            state.clone(),
            PublisherConfig {
                interval: Duration::from_millis(args.interval_ms.max(1)),
                batch: args.batch,
                ..PublisherConfig::default()
            },
        );
    }

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!("mock backend listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}
