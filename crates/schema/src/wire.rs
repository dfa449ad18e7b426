//! Frames exchanged on a streaming connection.
//!
//! Every frame is one JSON document inside a length-delimited envelope. The
//! server speaks first with [`ServerFrame::Hello`]; the client then opens a
//! method, streams records, and ends the stream; the server answers with a
//! single [`ServerFrame::Ack`] or [`ServerFrame::Error`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::records::Acknowledgment;

/// Protocol version announced in the server hello
pub const PROTOCOL_VERSION: u32 = 1;

/// Streaming operations exposed by the ground station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    StreamTelemetry,
    StreamDetections,
}

impl Method {
    pub const ALL: [Method; 2] = [Method::StreamTelemetry, Method::StreamDetections];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::StreamTelemetry => "StreamTelemetry",
            Method::StreamDetections => "StreamDetections",
        }
    }

    /// Parse a method name as sent in an `open` frame
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client to server frames.
///
/// The method travels as a plain string so an unknown name can be answered
/// with [`ErrorCode::Unimplemented`] instead of a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame<T> {
    Open { method: String },
    Record { record: T },
    End,
}

impl<T> ClientFrame<T> {
    pub fn open(method: Method) -> Self {
        ClientFrame::Open {
            method: method.as_str().to_string(),
        }
    }
}

/// Server to client frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Hello { version: u32 },
    Ack { ok: bool },
    Error { code: ErrorCode, message: String },
}

impl ServerFrame {
    pub fn hello() -> Self {
        ServerFrame::Hello {
            version: PROTOCOL_VERSION,
        }
    }

    pub fn ack(ack: Acknowledgment) -> Self {
        ServerFrame::Ack { ok: ack.ok }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            message: message.into(),
        }
    }
}

/// Reason carried by an error frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A frame could not be decoded for the open method
    InvalidArgument,
    /// Unknown method name
    Unimplemented,
    /// Frame arrived out of order (e.g. a record before `open`)
    FailedPrecondition,
    /// The server failed to persist a record
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::FailedPrecondition => "failed_precondition",
            ErrorCode::Internal => "internal",
        };
        f.write_str(s)
    }
}
