//! TCP transport.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tether_core::{Listener, Transport};
use tokio::net::{TcpListener, TcpStream};

/// Plain TCP via tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

/// Bound TCP listener handed out by [`TcpTransport::bind`].
#[derive(Debug)]
pub struct TcpTransportListener(TcpListener);

impl TcpTransportListener {
    /// Wrap an already bound tokio listener.
    pub fn new(listener: TcpListener) -> Self {
        Self(listener)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpTransportListener;

    async fn bind(&self, address: &str) -> io::Result<TcpTransportListener> {
        TcpListener::bind(address).await.map(TcpTransportListener)
    }

    async fn connect(&self, address: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(address).await?;
        // Frames are small and latency-bound.
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[async_trait]
impl Listener for TcpTransportListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.0.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use tether_core::{read_frame, write_frame};
    use tether_proto::{Handshake, PeerAddress};

    use super::*;

    #[tokio::test]
    async fn bound_listener_accepts_a_dialed_stream() {
        let listener = TcpTransport.bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let dial = tokio::spawn(async move {
            let mut stream = TcpTransport.connect(&address).await.unwrap();
            write_frame(&mut stream, &Handshake::Hello { from: PeerAddress::new("P1") })
                .await
                .unwrap();
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let hello: Option<Handshake> = read_frame(&mut stream).await.unwrap();
        assert_eq!(hello, Some(Handshake::Hello { from: PeerAddress::new("P1") }));
        dial.await.unwrap();
    }
}
