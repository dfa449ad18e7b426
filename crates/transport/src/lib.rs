//! Framed ingest transport shared by the ground station and its probes.
//!
//! Frames are length-prefixed JSON carried over TCP, optionally wrapped in
//! mutually authenticated TLS (rustls). Record and frame types live in
//! `uxv-schema`.

pub mod channel;
pub mod client;
pub mod connection;
pub mod error;
pub mod settings;
pub mod tls;

pub use channel::{ClientChannel, ConnectivityState, Incoming, ServerChannel};
pub use client::IngestClient;
pub use connection::Connection;
pub use error::TransportError;
pub use settings::{
    ChannelTuning, Endpoint, TlsSettings, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_KEEPALIVE,
    DEFAULT_MAX_MESSAGE_BYTES,
};
