//! uxv-schema: wire data model for the edge to ground link
//!
//! Records produced by the vehicle, the terminal acknowledgment, and the
//! frames exchanged on a streaming connection.

pub mod records;
pub mod wire;

pub use records::{Acknowledgment, BBox, DetectionRecord, StreamRecord, TelemetryRecord};
pub use wire::{ClientFrame, ErrorCode, Method, ServerFrame, PROTOCOL_VERSION};
