//! Server and client channel construction.
//!
//! Both ends apply the same [`ChannelTuning`] whether or not TLS is enabled.
//! After the transport is up the server greets with a `Hello` frame; the
//! client only reports `Ready` once that greeting arrives, so a TLS 1.3 client
//! certificate rejection (which surfaces after the client's handshake
//! completes) is never mistaken for a healthy link.

use std::fmt;
use std::net::SocketAddr;

use rustls::pki_types::ServerName;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, warn};
use uxv_schema::{ServerFrame, PROTOCOL_VERSION};

use crate::connection::{Connection, Io};
use crate::error::TransportError;
use crate::settings::{ChannelTuning, Endpoint, TlsSettings};
use crate::tls;

/// Client-side view of the link, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectivityState::Idle => "IDLE",
            ConnectivityState::Connecting => "CONNECTING",
            ConnectivityState::Ready => "READY",
            ConnectivityState::TransientFailure => "TRANSIENT_FAILURE",
        };
        f.write_str(s)
    }
}

fn apply_tuning(stream: &TcpStream, tuning: &ChannelTuning) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "set_nodelay failed");
    }

    let keepalive = TcpKeepalive::new().with_time(tuning.keepalive);
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    let keepalive = keepalive.with_interval(tuning.keepalive);

    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        warn!(error = %e, "Failed to enable TCP keepalive");
    }
}

/// Listening end of the ingest channel
pub struct ServerChannel {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    tuning: ChannelTuning,
    local_addr: SocketAddr,
}

impl ServerChannel {
    /// Load credentials (when TLS is enabled) and bind `addr`.
    ///
    /// Credential errors are returned before the socket is bound.
    pub async fn bind(
        addr: &str,
        tls: &TlsSettings,
        tuning: ChannelTuning,
    ) -> Result<Self, TransportError> {
        let endpoint = Endpoint::parse(addr)?;

        let acceptor = if tls.enabled {
            Some(TlsAcceptor::from(tls::server_config(&tls.cert_dir)?))
        } else {
            warn!("TLS disabled: ground channel accepts plaintext connections");
            None
        };

        let listener = TcpListener::bind(endpoint.authority())
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("bind {}: {}", endpoint, e)))?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            mode = if acceptor.is_some() { "mtls" } else { "insecure" },
            max_message_bytes = tuning.max_message_bytes,
            keepalive_secs = tuning.keepalive.as_secs(),
            "Ground channel listening"
        );

        Ok(Self {
            listener,
            acceptor,
            tuning,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_secure(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Accept the next TCP connection. The handshake is deferred to
    /// [`Incoming::establish`] so callers can run it off the accept loop.
    pub async fn accept(&self) -> Result<Incoming, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        apply_tuning(&stream, &self.tuning);
        Ok(Incoming {
            stream,
            peer,
            acceptor: self.acceptor.clone(),
            tuning: self.tuning,
        })
    }
}

/// An accepted TCP connection that has not completed its handshake yet
pub struct Incoming {
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    tuning: ChannelTuning,
}

impl Incoming {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Finish the TLS handshake (verifying the client certificate) and send
    /// the `Hello` greeting.
    pub async fn establish(self) -> Result<Connection, TransportError> {
        let Incoming {
            stream,
            peer,
            acceptor,
            tuning,
        } = self;

        let secure = acceptor.is_some();
        let io: Box<dyn Io> = match acceptor {
            Some(acceptor) => {
                let tls = timeout(tuning.handshake_timeout, acceptor.accept(stream))
                    .await
                    .map_err(|_| TransportError::Timeout)?
                    .map_err(|e| TransportError::Handshake(e.to_string()))?;
                Box::new(tls)
            }
            None => Box::new(stream),
        };

        let mut conn = Connection::new(io, peer, secure, tuning.max_message_bytes);
        conn.send(&ServerFrame::hello()).await?;
        Ok(conn)
    }
}

struct ClientTls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

/// Dialing end of the ingest channel
pub struct ClientChannel {
    endpoint: Endpoint,
    tls: Option<ClientTls>,
    tuning: ChannelTuning,
    state: watch::Sender<ConnectivityState>,
}

impl ClientChannel {
    /// Build a client channel. With TLS enabled, `ca.crt`, `client.crt` and
    /// `client.key` are loaded now; nothing is dialed until [`connect`].
    ///
    /// [`connect`]: ClientChannel::connect
    pub fn new(
        addr: &str,
        tls: &TlsSettings,
        tuning: ChannelTuning,
    ) -> Result<Self, TransportError> {
        let endpoint = Endpoint::parse(addr)?;

        let tls = if tls.enabled {
            let config = tls::client_config(&tls.cert_dir)?;
            if let Some(host) = &tls.override_host {
                warn!(
                    override_host = %host,
                    dialed_host = %endpoint.host(),
                    "TLS server name override active; server identity is checked against the override, not the dialed host"
                );
            }
            let server_name = tls::server_name(&endpoint, tls.override_host.as_deref())?;
            Some(ClientTls {
                connector: TlsConnector::from(config),
                server_name,
            })
        } else {
            None
        };

        let (state, _) = watch::channel(ConnectivityState::Idle);
        Ok(Self {
            endpoint,
            tls,
            tuning,
            state,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn mode(&self) -> &'static str {
        if self.tls.is_some() {
            "mtls"
        } else {
            "insecure"
        }
    }

    pub fn tuning(&self) -> ChannelTuning {
        self.tuning
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectivityState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, endpoint = %self.endpoint, "Connectivity changed");
        }
    }

    /// Dial, handshake and wait for the server greeting
    pub async fn connect(&self) -> Result<Connection, TransportError> {
        self.set_state(ConnectivityState::Connecting);
        match self.dial().await {
            Ok(conn) => {
                self.set_state(ConnectivityState::Ready);
                Ok(conn)
            }
            Err(e) => {
                self.set_state(ConnectivityState::TransientFailure);
                Err(e)
            }
        }
    }

    async fn dial(&self) -> Result<Connection, TransportError> {
        let authority = self.endpoint.authority();
        let limit = self.tuning.handshake_timeout;

        let stream = timeout(limit, TcpStream::connect(&authority))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", authority, e)))?;
        apply_tuning(&stream, &self.tuning);
        let peer = stream.peer_addr()?;

        let io: Box<dyn Io> = match &self.tls {
            Some(tls) => {
                let stream = timeout(limit, tls.connector.connect(tls.server_name.clone(), stream))
                    .await
                    .map_err(|_| TransportError::Timeout)?
                    .map_err(|e| TransportError::Handshake(e.to_string()))?;
                Box::new(stream)
            }
            None => Box::new(stream),
        };

        let mut conn = Connection::new(io, peer, self.tls.is_some(), self.tuning.max_message_bytes);
        let greeting = timeout(limit, conn.recv::<ServerFrame>())
            .await
            .map_err(|_| TransportError::Timeout)?;

        match greeting {
            Ok(Some(ServerFrame::Hello { version })) if version == PROTOCOL_VERSION => Ok(conn),
            Ok(Some(ServerFrame::Hello { version })) => Err(TransportError::Protocol(format!(
                "server speaks protocol version {}, expected {}",
                version, PROTOCOL_VERSION
            ))),
            Ok(Some(other)) => Err(TransportError::Protocol(format!(
                "expected hello, got {:?}",
                other
            ))),
            Ok(None) => Err(TransportError::Handshake(
                "server closed the connection before greeting".to_string(),
            )),
            Err(TransportError::Io(e)) => Err(TransportError::Handshake(e.to_string())),
            Err(e) => Err(e),
        }
    }
}
