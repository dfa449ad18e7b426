use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::time::timeout;
use tracing::debug;
use uxv_schema::{
    Acknowledgment, ClientFrame, DetectionRecord, ServerFrame, StreamRecord, TelemetryRecord,
};

use crate::channel::ClientChannel;
use crate::connection::Connection;
use crate::error::TransportError;

/// Vehicle-side ingest client: one connection per stream call
#[derive(Clone)]
pub struct IngestClient {
    channel: Arc<ClientChannel>,
}

impl IngestClient {
    pub fn new(channel: ClientChannel) -> Self {
        Self {
            channel: Arc::new(channel),
        }
    }

    pub fn channel(&self) -> &ClientChannel {
        &self.channel
    }

    pub async fn stream_telemetry<S>(&self, records: S) -> Result<Acknowledgment, TransportError>
    where
        S: Stream<Item = TelemetryRecord>,
    {
        self.stream(records).await
    }

    pub async fn stream_detections<S>(&self, records: S) -> Result<Acknowledgment, TransportError>
    where
        S: Stream<Item = DetectionRecord>,
    {
        self.stream(records).await
    }

    /// Send every record from `records`, end the stream and wait for the
    /// single acknowledgment.
    pub async fn stream<R, S>(&self, records: S) -> Result<Acknowledgment, TransportError>
    where
        R: StreamRecord,
        S: Stream<Item = R>,
    {
        let mut conn = self.channel.connect().await?;
        if let Err(e) = conn.send(&ClientFrame::<R>::open(R::METHOD)).await {
            return Err(self.rejection_or(&mut conn, e).await);
        }

        futures_util::pin_mut!(records);
        let mut sent = 0u64;
        while let Some(record) = records.next().await {
            if let Err(e) = conn.send(&ClientFrame::Record { record }).await {
                return Err(self.rejection_or(&mut conn, e).await);
            }
            sent += 1;
        }
        if let Err(e) = conn.send(&ClientFrame::<R>::End).await {
            return Err(self.rejection_or(&mut conn, e).await);
        }
        debug!(method = %R::METHOD, sent, "Stream ended, awaiting acknowledgment");

        match conn.recv::<ServerFrame>().await? {
            Some(ServerFrame::Ack { ok }) => Ok(Acknowledgment { ok }),
            Some(ServerFrame::Error { code, message }) => {
                Err(TransportError::Rejected { code, message })
            }
            Some(ServerFrame::Hello { .. }) => {
                Err(TransportError::Protocol("unexpected hello after stream end".to_string()))
            }
            None => Err(TransportError::NoAck),
        }
    }

    /// A write failed; the server may have rejected the stream and closed.
    /// Prefer its error frame over the broken-pipe error when one is buffered.
    async fn rejection_or(&self, conn: &mut Connection, err: TransportError) -> TransportError {
        match timeout(self.channel.tuning().handshake_timeout, conn.recv::<ServerFrame>()).await {
            Ok(Ok(Some(ServerFrame::Error { code, message }))) => {
                TransportError::Rejected { code, message }
            }
            _ => err,
        }
    }
}
