//! Transport capability and frame I/O over byte streams.
//!
//! The lifecycle code never touches sockets. Runtimes plug in a [`Transport`]
//! (TCP in production, turmoil in simulation) and move frames with
//! [`write_frame`] and [`read_frame`].

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use tether_proto::{HEADER_LEN, decode_body, encode_frame, frame_len};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Stream-oriented network capability.
#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    /// Bidirectional byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Bound listener yielding [`Transport::Stream`]s.
    type Listener: Listener<Stream = Self::Stream>;

    /// Bind a listener on `address`.
    async fn bind(&self, address: &str) -> io::Result<Self::Listener>;

    /// Dial `address`.
    async fn connect(&self, address: &str) -> io::Result<Self::Stream>;
}

/// Accepting half of a [`Transport`].
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Stream produced by `accept`.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next inbound stream.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Encode `value` as one frame and flush it.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize + Sync,
{
    let frame = encode_frame(value)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame body. `None` when the stream ends between frames.
pub async fn read_frame_bytes<R>(reader: &mut R) -> Result<Option<Bytes>, TransportError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {},
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = frame_len(header)?;
    let mut body = vec![0u8; len];
    match reader.read_exact(&mut body).await {
        Ok(_) => Ok(Some(Bytes::from(body))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(TransportError::Closed),
        Err(e) => Err(e.into()),
    }
}

/// Read and decode one frame. `None` when the stream ends between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, TransportError>
where
    R: AsyncRead + Unpin + Send,
    T: DeserializeOwned,
{
    match read_frame_bytes(reader).await? {
        Some(body) => Ok(Some(decode_body(&body)?)),
        None => Ok(None),
    }
}
