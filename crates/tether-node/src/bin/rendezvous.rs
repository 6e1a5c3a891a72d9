//! Tether rendezvous service binary.
//!
//! # Usage
//!
//! ```bash
//! tether-rendezvous --bind 0.0.0.0:7400
//! ```

use clap::Parser;
use tether_node::{RendezvousConfig, RendezvousServer, SystemEnv, TcpTransport};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tether rendezvous service
#[derive(Parser, Debug)]
#[command(name = "tether-rendezvous")]
#[command(about = "Assigns peer addresses and resolves them to endpoints")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:7400")]
    bind: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = RendezvousConfig { bind_address: args.bind };
    let server = RendezvousServer::bind(SystemEnv::new(), &TcpTransport, &config).await?;

    server.run().await?;

    Ok(())
}
