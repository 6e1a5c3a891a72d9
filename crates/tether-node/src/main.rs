//! Tether participant binary.
//!
//! # Usage
//!
//! ```bash
//! # Host a session
//! tether-node --rendezvous 127.0.0.1:7400 --host
//!
//! # Join a host by the address it logged
//! tether-node --rendezvous 127.0.0.1:7400 --join 3f9c0a1b2c3d4e5f
//! ```
//!
//! Once running, commands are read from stdin, one per line:
//!
//! | Command        | Effect                                   |
//! |----------------|------------------------------------------|
//! | `open`         | register with the rendezvous service     |
//! | `host`         | start accepting peers                    |
//! | `join <addr>`  | connect to a participant                 |
//! | `say <text>`   | log and send a message                   |
//! | `update`       | advance the world and broadcast it       |
//! | `status`       | log session, connections, messages       |
//! | `close`        | close the session                        |
//! | `quit`         | close and exit                           |

use std::time::Duration;

use clap::Parser;
use tether_core::{Environment, ManagerConfig};
use tether_node::{
    Node, NodeConfig, NodeError, NodeHandle, Notice, SystemEnv, TcpTransport, World,
};
use tether_proto::PeerAddress;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tether participant
#[derive(Parser, Debug)]
#[command(name = "tether-node")]
#[command(about = "Peer-to-peer session participant")]
#[command(version)]
struct Args {
    /// Rendezvous service address
    #[arg(short, long, default_value = "127.0.0.1:7400")]
    rendezvous: String,

    /// Address to accept direct channels on
    #[arg(short, long, default_value = "0.0.0.0:0")]
    listen: String,

    /// Port advertised to the rendezvous service (defaults to the bound port)
    #[arg(long)]
    advertise_port: Option<u16>,

    /// Registration and channel confirmation timeout in milliseconds
    #[arg(long, default_value = "3000")]
    timeout_ms: u64,

    /// Deadline evaluation interval in milliseconds
    #[arg(long, default_value = "50")]
    tick_ms: u64,

    /// Open a session and host immediately
    #[arg(long, conflicts_with = "join")]
    host: bool,

    /// Open a session and join this address immediately
    #[arg(long)]
    join: Option<String>,

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

    let timeout = Duration::from_millis(args.timeout_ms);
    let config = NodeConfig {
        rendezvous_address: args.rendezvous,
        listen_address: args.listen,
        advertise_port: args.advertise_port,
        tick_interval: Duration::from_millis(args.tick_ms),
        manager: ManagerConfig { signaling_timeout: timeout, connection_timeout: timeout },
    };

    let env = SystemEnv::new();
    let (handle, node) = Node::spawn(env, TcpTransport, config).await?;
    tokio::spawn(log_notices(handle.clone()));

    if args.host || args.join.is_some() {
        let address = handle.open_session().await?;
        tracing::info!("Session open as {}", address);

        if args.host {
            handle.become_host().await?;
        } else if let Some(host) = args.join {
            let channel = handle.connect_to_peer(PeerAddress::new(host)).await?;
            tracing::info!("Joined {} on {}", channel.remote, channel.id);
        }
    }

    let mut world = World::new(env.unix_millis());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match run_command(&handle, &mut world, &env, line.trim()).await {
            Ok(true) => {},
            Ok(false) => break,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => tracing::warn!("{}", e),
        }
    }

    handle.shutdown().await?;
    node.await?;

    Ok(())
}

/// Execute one stdin command. Returns `false` to exit.
async fn run_command(
    handle: &NodeHandle,
    world: &mut World,
    env: &SystemEnv,
    line: &str,
) -> Result<bool, NodeError> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

    match command {
        "" => {},
        "open" => {
            let address = handle.open_session().await?;
            tracing::info!("Session open as {}", address);
        },
        "host" => {
            handle.become_host().await?;
            tracing::info!("Hosting");
        },
        "join" => {
            let channel = handle.connect_to_peer(PeerAddress::new(rest.trim())).await?;
            tracing::info!("Joined {} on {}", channel.remote, channel.id);
        },
        "say" => handle.submit_message(rest).await?,
        "update" => {
            // A joined peer continues from the host's world, not its own.
            world.adopt(&handle.status().await?.snapshot)?;
            world.update(env.unix_millis());
            handle.update_snapshot(world.to_snapshot()?).await?;
            tracing::info!(turn = world.turn, elapsed = world.time.elapsed, "World updated");
        },
        "status" => {
            let status = handle.status().await?;
            tracing::info!(
                address = ?status.session.address,
                session = ?status.session.status,
                role = ?status.role,
                "Status"
            );
            for channel in &status.connections {
                tracing::info!("  {} {} {:?}", channel.id, channel.remote, channel.role);
            }
            for message in &status.messages {
                tracing::info!("  [{}] {}: {}", message.timestamp, message.origin, message.text);
            }
            for fault in &status.faults {
                tracing::info!("  fault at {}: {}", fault.timestamp, fault);
            }
        },
        "close" => handle.close_session().await?,
        "quit" => return Ok(false),
        other => tracing::warn!("Unknown command: {}", other),
    }

    Ok(true)
}

/// Log node notifications until the node stops.
async fn log_notices(handle: NodeHandle) {
    let mut notices = handle.subscribe();
    drop(handle);

    loop {
        match notices.recv().await {
            Ok(Notice::Message(message)) => {
                tracing::info!("[{}] {}: {}", message.timestamp, message.origin, message.text);
            },
            Ok(Notice::Snapshot(snapshot)) => match World::from_snapshot(&snapshot) {
                Ok(world) => {
                    let (turn, elapsed) = (world.turn, world.time.elapsed);
                    tracing::info!(turn, elapsed, "World received");
                },
                Err(e) => tracing::warn!("Undecodable world snapshot: {}", e),
            },
            Ok(Notice::ChannelReady(channel)) => {
                tracing::info!("Connected to {} ({:?})", channel.remote, channel.role);
            },
            Ok(Notice::PeerJoined(channel)) => tracing::info!("{} joined", channel.remote),
            Ok(Notice::ChannelRemoved(channel)) => {
                tracing::info!("Disconnected from {}", channel.remote);
            },
            Ok(Notice::Fault(_) | Notice::SessionResolved(_)) => {},
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!("Missed {} notifications", missed);
            },
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
