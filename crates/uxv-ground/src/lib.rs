//! uxv-ground: ground-side collector for vehicle streams
//!
//! Accepts `StreamTelemetry` and `StreamDetections` streams over a plaintext
//! or mutually authenticated TLS channel, appends every record to a
//! per-mission JSONL file, and forwards the finished mission to an archive
//! endpoint when the mission closes.

pub mod archive;
pub mod config;
pub mod error;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod recorder;
pub mod server;

pub use archive::{ArchiveForwarder, Archiver, ForwardOutcome, NoopArchiver};
pub use config::{Args, Config};
pub use error::{ArchiveError, GroundError, IngestError, Result};
pub use ingest::{IngestService, StreamState, StreamSummary};
pub use recorder::{MissionRecorder, RecorderOptions};
pub use server::GroundServer;
