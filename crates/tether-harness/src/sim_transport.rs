//! Turmoil transport.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tether_core::{Listener, Transport};
use turmoil::net::{TcpListener, TcpStream};

/// TCP over turmoil's simulated network.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTransport;

/// Listener bound inside the simulation.
pub struct SimListener(TcpListener);

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;
    type Listener = SimListener;

    async fn bind(&self, address: &str) -> io::Result<SimListener> {
        TcpListener::bind(address).await.map(SimListener)
    }

    async fn connect(&self, address: &str) -> io::Result<TcpStream> {
        TcpStream::connect(address).await
    }
}

#[async_trait]
impl Listener for SimListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.0.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }
}
