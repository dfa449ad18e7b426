//! uxv-probe: readiness probe for the ground channel
//!
//! Dials the ground station the same way a vehicle would (optionally with
//! mutual TLS) and reports whether the channel reaches READY, without
//! sending any data.

pub mod config;
pub mod probe;

pub use config::Args;
pub use probe::{ProbeError, ProbeOutcome, ProbeSettings, Prober};
