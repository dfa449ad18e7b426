use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::wire::Method;

/// A record type carried by one of the streaming operations.
pub trait StreamRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Streaming operation that carries this record type
    const METHOD: Method;

    /// Stream name the recorder files these records under
    const STREAM_NAME: &'static str;

    /// Producer timestamp in nanoseconds
    fn ts_ns(&self) -> i64;
}

/// Vehicle pose and velocity sample.
///
/// Missing fields decode as zero, matching the producer's default-value
/// encoding. Values are never range-checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryRecord {
    pub ts_ns: i64,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
    pub yaw_deg: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
    /// Velocity north (m/s)
    pub vn: f64,
    /// Velocity east (m/s)
    pub ve: f64,
    /// Velocity down (m/s)
    pub vd: f64,
}

impl StreamRecord for TelemetryRecord {
    const METHOD: Method = Method::StreamTelemetry;
    const STREAM_NAME: &'static str = "telemetry";

    fn ts_ns(&self) -> i64 {
        self.ts_ns
    }
}

/// Pixel-space bounding box
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Object detection emitted by the onboard classifier.
///
/// `confidence` is expected in [0, 1] but is stored exactly as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionRecord {
    pub ts_ns: i64,
    pub cls: String,
    pub confidence: f64,
    pub bbox: BBox,
    pub lat: f64,
    pub lon: f64,
}

impl StreamRecord for DetectionRecord {
    const METHOD: Method = Method::StreamDetections;
    const STREAM_NAME: &'static str = "detections";

    fn ts_ns(&self) -> i64 {
        self.ts_ns
    }
}

/// Terminal reply to a completed stream. There are no partial acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_missing_fields_default_to_zero() {
        let rec: TelemetryRecord =
            serde_json::from_str(r#"{"ts_ns":1700000000000000000,"lat":32.7}"#).unwrap();
        assert_eq!(rec.ts_ns, 1_700_000_000_000_000_000);
        assert_eq!(rec.lat, 32.7);
        assert_eq!(rec.alt_m, 0.0);
        assert_eq!(rec.vd, 0.0);
    }

    #[test]
    fn test_detection_confidence_not_clamped() {
        let json = r#"{"ts_ns":5,"cls":"target","confidence":1.7,"bbox":{"x":1,"y":2,"w":3,"h":4}}"#;
        let rec: DetectionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.confidence, 1.7);
        assert_eq!(rec.bbox, BBox { x: 1.0, y: 2.0, w: 3.0, h: 4.0 });

        let back = serde_json::to_string(&rec).unwrap();
        assert!(back.contains("\"confidence\":1.7"));
    }

    #[test]
    fn test_negative_coordinates_survive_serialization() {
        let rec = TelemetryRecord {
            ts_ns: 42,
            lat: -33.8688,
            lon: -117.16,
            ..Default::default()
        };
        let line = serde_json::to_string(&rec).unwrap();
        let parsed: TelemetryRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, rec);
    }

    #[test]
    fn test_awkward_floats_round_trip_bit_exact() {
        let rec = TelemetryRecord {
            ts_ns: 7,
            lat: -116.83361554809613,
            lon: 21.877423353265442,
            alt_m: 0.1 + 0.2,
            ..Default::default()
        };
        let parsed: TelemetryRecord =
            serde_json::from_str(&serde_json::to_string(&rec).unwrap()).unwrap();
        assert_eq!(parsed.lat.to_bits(), rec.lat.to_bits());
        assert_eq!(parsed.lon.to_bits(), rec.lon.to_bits());
        assert_eq!(parsed.alt_m.to_bits(), rec.alt_m.to_bits());

        // Deterministic sweep over many mantissas
        let mut x: u64 = 0x9e37_79b9_7f4a_7c15;
        for _ in 0..20_000 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            let value = (x >> 11) as f64 / (1u64 << 53) as f64 * 360.0 - 180.0;
            let back: f64 = serde_json::from_str(&serde_json::to_string(&value).unwrap()).unwrap();
            assert_eq!(back.to_bits(), value.to_bits(), "{} did not round trip", value);
        }
    }

    #[test]
    fn test_stream_names() {
        assert_eq!(TelemetryRecord::STREAM_NAME, "telemetry");
        assert_eq!(DetectionRecord::STREAM_NAME, "detections");
        assert_eq!(TelemetryRecord::METHOD, Method::StreamTelemetry);
        assert_eq!(DetectionRecord::METHOD, Method::StreamDetections);
    }
}
