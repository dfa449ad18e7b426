//! Accept loop: one task per connection, drained on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uxv_schema::{ClientFrame, DetectionRecord, ErrorCode, Method, TelemetryRecord};
use uxv_transport::{Incoming, ServerChannel, TransportError};

use crate::ingest::{reject, IngestService};
use crate::metrics;
use crate::recorder::MissionRecorder;

/// Default time in-flight streams get to finish after shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct Services {
    telemetry: IngestService<TelemetryRecord>,
    detections: IngestService<DetectionRecord>,
}

pub struct GroundServer {
    channel: ServerChannel,
    services: Arc<Services>,
    grace: Duration,
}

impl GroundServer {
    pub fn new(channel: ServerChannel, recorder: Arc<MissionRecorder>, grace: Duration) -> Self {
        let services = Services {
            telemetry: IngestService::new(Arc::clone(&recorder)),
            detections: IngestService::new(recorder),
        };
        Self {
            channel,
            services: Arc::new(services),
            grace,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    /// Serve until `shutdown` fires, then give in-flight streams the grace
    /// period before aborting them.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut tasks: JoinSet<()> = JoinSet::new();
        info!(addr = %self.local_addr(), secure = self.channel.is_secure(), "Ground server running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = self.channel.accept() => match accepted {
                    Ok(incoming) => {
                        let services = Arc::clone(&self.services);
                        tasks.spawn(handle_connection(incoming, services));
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), grace_secs = self.grace.as_secs_f64(), "Draining in-flight streams");
        }
        let drained = timeout(self.grace, async {
            while let Some(joined) = tasks.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = tasks.len(), "Grace period elapsed, aborting streams without acknowledgment");
            tasks.shutdown().await;
        }
        info!("Ground server stopped");
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Connection task panicked");
        }
    }
}

async fn handle_connection(incoming: Incoming, services: Arc<Services>) {
    let peer = incoming.peer_addr();
    let mut conn = match incoming.establish().await {
        Ok(conn) => {
            metrics::connection("established");
            conn
        }
        Err(e) => {
            metrics::connection("handshake_failed");
            warn!(%peer, error = %e, "Handshake failed");
            return;
        }
    };
    debug!(%peer, secure = conn.is_secure(), "Connection established");

    let method = match conn.recv::<ClientFrame<serde_json::Value>>().await {
        Ok(Some(ClientFrame::Open { method })) => method,
        Ok(Some(_)) => {
            reject(&mut conn, ErrorCode::FailedPrecondition, "expected an open frame first").await;
            return;
        }
        Ok(None) => {
            debug!(%peer, "Connection closed before a stream was opened");
            return;
        }
        Err(TransportError::Decode(e)) => {
            reject(&mut conn, ErrorCode::InvalidArgument, &e.to_string()).await;
            return;
        }
        Err(e) => {
            warn!(%peer, error = %e, "Failed to read open frame");
            return;
        }
    };

    let result = match Method::from_wire(&method) {
        Some(Method::StreamTelemetry) => services.telemetry.serve(&mut conn).await,
        Some(Method::StreamDetections) => services.detections.serve(&mut conn).await,
        None => {
            reject(&mut conn, ErrorCode::Unimplemented, &format!("unknown method {:?}", method)).await;
            return;
        }
    };

    match result {
        Ok(summary) => debug!(%peer, method = %summary.method, records = summary.records, "Stream complete"),
        Err(e) => debug!(%peer, method = %method, error = %e, "Stream ended without acknowledgment"),
    }
    if let Err(e) = conn.close().await {
        debug!(%peer, error = %e, "Close failed");
    }
}
