use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::TransportError;

/// Any byte stream a connection can run over (plain TCP or TLS)
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// An established connection exchanging length-prefixed JSON frames
pub struct Connection {
    framed: Framed<Box<dyn Io>, LengthDelimitedCodec>,
    peer: SocketAddr,
    secure: bool,
}

impl Connection {
    pub(crate) fn new(
        io: Box<dyn Io>,
        peer: SocketAddr,
        secure: bool,
        max_frame_length: usize,
    ) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(max_frame_length)
            .new_codec();
        Self {
            framed: Framed::new(io, codec),
            peer,
            secure,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// True when the connection runs over mutually authenticated TLS
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub async fn send<T: Serialize>(&mut self, frame: &T) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(frame)?;
        self.framed.send(Bytes::from(payload)).await?;
        Ok(())
    }

    /// Next frame, or `None` once the peer has closed its side
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        match self.framed.next().await {
            Some(Ok(buf)) => Ok(Some(serde_json::from_slice(&buf)?)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Flush pending frames and shut down the write side
    pub async fn close(mut self) -> Result<(), TransportError> {
        SinkExt::<Bytes>::close(&mut self.framed).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("secure", &self.secure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    fn pair(max: usize) -> (Connection, Connection) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        (
            Connection::new(Box::new(a), addr, false, max),
            Connection::new(Box::new(b), addr, false, max),
        )
    }

    #[tokio::test]
    async fn test_frames_cross_the_pipe_in_order() {
        let (mut tx, mut rx) = pair(1024);
        for seq in 0..3 {
            tx.send(&Ping { seq }).await.unwrap();
        }
        tx.close().await.unwrap();

        for seq in 0..3 {
            assert_eq!(rx.recv::<Ping>().await.unwrap(), Some(Ping { seq }));
        }
        assert_eq!(rx.recv::<Ping>().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_refused_by_receiver() {
        let (a, b) = tokio::io::duplex(1024);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut tx = Connection::new(Box::new(a), addr, false, 1024);
        let mut rx = Connection::new(Box::new(b), addr, false, 8);

        tx.send(&Ping { seq: 123456 }).await.unwrap();
        let err = rx.recv::<Ping>().await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[tokio::test]
    async fn test_malformed_json_is_decode_error() {
        let (a, b) = tokio::io::duplex(1024);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut raw = Framed::new(a, LengthDelimitedCodec::new());
        let mut rx = Connection::new(Box::new(b), addr, false, 1024);

        raw.send(Bytes::from_static(b"{not json")).await.unwrap();
        let err = rx.recv::<Ping>().await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }
}
