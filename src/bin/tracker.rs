use clap::Parser;
use tokio_util::sync::CancellationToken;

use swarmhub::config::TrackerArgs;
use swarmhub::prelude::*;
use swarmhub::tracker::TrackerServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = TrackerArgs::parse();
    swarmhub::init_tracing(args.log_compact);

    let shutdown = CancellationToken::new();
    let server = TrackerServer::bind(args.bind.port(), args.workers, shutdown.clone()).await?;
    info!(addr = %server.local_addr(), "tracker up, waiting for ctrl-c");

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");
    shutdown.cancel();

    Ok(())
}
