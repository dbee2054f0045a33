//! Transport abstraction for the setup exchange.
//!
//! Abstracts over ordered byte streams. Production uses TCP (optionally
//! wrapped in TLS after the security upgrade), tests use in-memory duplex
//! pipes.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Abstract ordered byte-stream transport.
///
/// Chunk boundaries carry no meaning; the frame reassembler above this
/// layer restores packet boundaries.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write these bytes to the peer.
    async fn send(&mut self, bytes: Bytes) -> io::Result<()>;

    /// Read the next chunk of bytes from the peer.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream cleanly.
    async fn receive(&mut self) -> io::Result<Option<Bytes>>;
}

/// Factory producing fresh transports, one per connection attempt.
///
/// A refused negotiation tears the stream down, so the downgrade retry
/// needs a brand-new connection rather than the old one.
#[async_trait]
pub trait Connect: Send {
    /// Transport produced per attempt.
    type Transport: Transport;

    /// Establish a new connection to the peer.
    async fn connect(&mut self) -> io::Result<Self::Transport>;
}

/// [`Transport`] over any tokio byte stream.
///
/// Works with `TcpStream`, a TLS-wrapped stream, or `tokio::io::duplex`
/// pipes in tests.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
}

impl<S> StreamTransport<S> {
    /// Wrap a byte stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Unwrap the inner stream, for security upgrades that consume it.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&mut self, bytes: Bytes) -> io::Result<()> {
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await
    }

    async fn receive(&mut self) -> io::Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(4096);
        let read = self.stream.read_buf(&mut buf).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_over_a_duplex_pipe() {
        let (near, far) = tokio::io::duplex(64);
        let mut near = StreamTransport::new(near);
        let mut far = StreamTransport::new(far);

        near.send(Bytes::from_static(b"hello")).await.unwrap();
        let chunk = far.receive().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"hello");

        drop(near);
        assert!(far.receive().await.unwrap().is_none());
    }
}
