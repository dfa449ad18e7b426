//! Prometheus metrics for the ground station

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounter,
    IntCounterVec, IntGaugeVec, TextEncoder,
};

const LABEL_STREAM: &str = "stream";
const LABEL_OUTCOME: &str = "outcome";

/// Records durably appended per stream
static RECORDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "uxv_ground_records_total",
        "Total records written by the ground station",
        &[LABEL_STREAM]
    )
    .expect("Failed to register records_total metric")
});

/// Finished streams by outcome (acked, cancelled, rejected, failed)
static STREAMS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "uxv_ground_streams_total",
        "Total ingest streams by outcome",
        &[LABEL_STREAM, LABEL_OUTCOME]
    )
    .expect("Failed to register streams_total metric")
});

static ACTIVE_STREAMS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "uxv_ground_active_streams",
        "Ingest streams currently receiving",
        &[LABEL_STREAM]
    )
    .expect("Failed to register active_streams metric")
});

/// Accepted connections by handshake result
static CONNECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "uxv_ground_connections_total",
        "Accepted connections by handshake outcome",
        &[LABEL_OUTCOME]
    )
    .expect("Failed to register connections_total metric")
});

static ARCHIVE_TRANSFERS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "uxv_ground_archive_transfers_total",
        "Files forwarded to the archive endpoint by outcome",
        &[LABEL_OUTCOME]
    )
    .expect("Failed to register archive_transfers_total metric")
});

static ARCHIVE_BYTES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "uxv_ground_archive_bytes_total",
        "Bytes accepted by the archive endpoint"
    )
    .expect("Failed to register archive_bytes_total metric")
});

/// Metrics handle for one ingest stream
#[derive(Clone, Copy)]
pub struct StreamMetrics {
    stream: &'static str,
}

impl StreamMetrics {
    /// Marks the stream active until [`StreamMetrics::finished`]
    pub fn started(stream: &'static str) -> Self {
        ACTIVE_STREAMS.with_label_values(&[stream]).inc();
        Self { stream }
    }

    pub fn inc_record(&self) {
        RECORDS_TOTAL.with_label_values(&[self.stream]).inc();
    }

    pub fn finished(self, outcome: &str) {
        ACTIVE_STREAMS.with_label_values(&[self.stream]).dec();
        STREAMS_TOTAL
            .with_label_values(&[self.stream, outcome])
            .inc();
    }

    pub fn records_total(&self) -> u64 {
        RECORDS_TOTAL.with_label_values(&[self.stream]).get()
    }
}

pub fn connection(outcome: &str) {
    CONNECTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn archive_transfer(outcome: &str) {
    ARCHIVE_TRANSFERS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn archive_bytes(bytes: u64) {
    ARCHIVE_BYTES_TOTAL.inc_by(bytes);
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
