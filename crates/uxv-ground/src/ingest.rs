//! Streaming ingest: one long-lived receive per connection.
//!
//! Every record is decoded into its typed shape and durably appended before
//! the next frame is read. The single acknowledgment is sent only after an
//! explicit end-of-stream; any other ending leaves the records already
//! written on disk and sends no ack.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uxv_schema::{Acknowledgment, ClientFrame, ErrorCode, Method, ServerFrame, StreamRecord};
use uxv_transport::{Connection, TransportError};

use crate::error::IngestError;
use crate::metrics::StreamMetrics;
use crate::recorder::MissionRecorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Receiving,
    Closed,
    Acked,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Open => "open",
            StreamState::Receiving => "receiving",
            StreamState::Closed => "closed",
            StreamState::Acked => "acked",
        };
        f.write_str(s)
    }
}

/// Result of a stream that reached its acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub method: Method,
    pub records: u64,
    pub state: StreamState,
}

pub struct IngestService<R> {
    recorder: Arc<MissionRecorder>,
    _record: PhantomData<fn() -> R>,
}

impl<R: StreamRecord> IngestService<R> {
    pub fn new(recorder: Arc<MissionRecorder>) -> Self {
        Self {
            recorder,
            _record: PhantomData,
        }
    }

    pub fn method(&self) -> Method {
        R::METHOD
    }

    /// Serve an opened stream until end-of-stream, then acknowledge.
    ///
    /// The caller has already consumed the `open` frame.
    pub async fn serve(&self, conn: &mut Connection) -> Result<StreamSummary, IngestError> {
        let metrics = StreamMetrics::started(R::STREAM_NAME);
        let result = self.receive(conn, &metrics).await;

        let outcome = match &result {
            Ok(_) => "acked",
            Err(IngestError::Cancelled { .. }) | Err(IngestError::Transport(_)) => "cancelled",
            Err(IngestError::Recorder(_)) => "failed",
            Err(_) => "rejected",
        };
        metrics.finished(outcome);
        result
    }

    async fn receive(
        &self,
        conn: &mut Connection,
        metrics: &StreamMetrics,
    ) -> Result<StreamSummary, IngestError> {
        let peer = conn.peer_addr();
        let stream = R::STREAM_NAME;
        let mut state = StreamState::Open;
        let mut count: u64 = 0;

        debug!(%peer, stream, "Stream opened");

        loop {
            let frame = match conn.recv::<ClientFrame<R>>().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    warn!(%peer, stream, records = count, state = %state, "Stream dropped before end-of-stream, no acknowledgment");
                    return Err(IngestError::Cancelled { records: count });
                }
                Err(TransportError::Decode(e)) => {
                    let message = format!("record {} does not match {}: {}", count + 1, R::METHOD, e);
                    reject(conn, ErrorCode::InvalidArgument, &message).await;
                    return Err(IngestError::Malformed(message));
                }
                Err(e) => {
                    warn!(%peer, stream, records = count, error = %e, "Stream failed, no acknowledgment");
                    return Err(e.into());
                }
            };

            match frame {
                ClientFrame::Record { record } => {
                    state = StreamState::Receiving;
                    let ts_ns = record.ts_ns();
                    if let Err(e) = self.recorder.write(stream, &record).await {
                        reject(conn, ErrorCode::Internal, &e.to_string()).await;
                        return Err(IngestError::Recorder(e));
                    }
                    count += 1;
                    metrics.inc_record();
                    debug!(stream, seq = count, ts_ns, "Record written");
                }
                ClientFrame::End => {
                    state = StreamState::Closed;
                    break;
                }
                ClientFrame::Open { method } => {
                    let message = format!("stream already open, got second open for {}", method);
                    reject(conn, ErrorCode::FailedPrecondition, &message).await;
                    return Err(IngestError::Protocol(message));
                }
            }
        }

        debug!(%peer, stream, state = %state, "End of stream");
        conn.send(&ServerFrame::ack(Acknowledgment { ok: true })).await?;
        state = StreamState::Acked;

        info!(
            %peer,
            stream,
            mission_id = %self.recorder.mission_id(),
            records = count,
            "Stream closed, acknowledged"
        );

        Ok(StreamSummary {
            method: R::METHOD,
            records: count,
            state,
        })
    }
}

/// Best-effort error frame; the stream is over either way
pub(crate) async fn reject(conn: &mut Connection, code: ErrorCode, message: &str) {
    warn!(peer = %conn.peer_addr(), code = %code, message, "Rejecting stream");
    if let Err(e) = conn.send(&ServerFrame::error(code, message)).await {
        debug!(error = %e, "Failed to send error frame");
    }
}
