//! Rendezvous service.
//!
//! Accepts signaling connections, assigns each registered participant an
//! address, and resolves addresses to the endpoint the participant
//! advertised: the IP observed on its signaling socket plus the port it
//! registered with. An address lives as long as its signaling connection.

use std::{net::SocketAddr, sync::Arc};

use tether_core::{
    Environment, Listener, Rendezvous, Transport, TransportError, read_frame, write_frame,
};
use tether_proto::{PeerAddress, Signal};

use crate::{config::RendezvousConfig, error::NodeError};

type SharedRegistry<E> = Arc<tokio::sync::Mutex<Rendezvous<E>>>;

/// Rendezvous server over transport `T`.
pub struct RendezvousServer<E: Environment, T: Transport> {
    registry: SharedRegistry<E>,
    listener: T::Listener,
}

impl<E: Environment, T: Transport> RendezvousServer<E, T> {
    /// Bind the service.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Io` if binding fails.
    pub async fn bind(env: E, transport: &T, config: &RendezvousConfig) -> Result<Self, NodeError> {
        let listener = transport.bind(&config.bind_address).await?;
        Ok(Self { registry: Arc::new(tokio::sync::Mutex::new(Rendezvous::new(env))), listener })
    }

    /// Address the service is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, NodeError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve signaling connections until the listener fails.
    pub async fn run(self) -> Result<(), NodeError> {
        tracing::info!("Rendezvous listening on {}", self.listener.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, registry).await {
                            tracing::debug!(%peer, "Signaling connection error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }
}

/// Serve one participant's signaling connection.
async fn handle_connection<E, S>(
    mut stream: S,
    peer: SocketAddr,
    registry: SharedRegistry<E>,
) -> Result<(), TransportError>
where
    E: Environment,
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    tracing::debug!(%peer, "signaling connection");
    let mut registered: Option<PeerAddress> = None;

    let result = serve(&mut stream, peer, &registry, &mut registered).await;

    if let Some(address) = registered {
        registry.lock().await.unregister(&address);
    }
    result
}

async fn serve<E, S>(
    stream: &mut S,
    peer: SocketAddr,
    registry: &SharedRegistry<E>,
    registered: &mut Option<PeerAddress>,
) -> Result<(), TransportError>
where
    E: Environment,
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    while let Some(signal) = read_frame::<_, Signal>(stream).await? {
        let reply = match signal {
            Signal::Register { port } => {
                // One address per connection; a repeated Register gets the same one.
                let address = match registered {
                    Some(address) => address.clone(),
                    None => {
                        let endpoint = SocketAddr::new(peer.ip(), port);
                        let address = registry.lock().await.register(endpoint);
                        *registered = Some(address.clone());
                        address
                    },
                };
                Signal::Registered { address }
            },
            Signal::Lookup { address } => {
                let endpoint = registry.lock().await.lookup(&address);
                match endpoint {
                    Some(endpoint) => Signal::Located { address, endpoint },
                    None => Signal::Unknown { address },
                }
            },
            other => {
                tracing::warn!(%peer, signal = ?other, "unexpected signal from participant");
                continue;
            },
        };

        write_frame(stream, &reply).await?;
    }

    Ok(())
}
