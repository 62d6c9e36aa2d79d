//! Provider binary: expose a local UCI engine over a WebSocket endpoint.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bridge_server::config::Opt;
use bridge_server::server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("BRIDGE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let opt = Opt::parse();
    server::run(opt).await
}
