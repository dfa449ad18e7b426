//! Forwarding of finished mission files to the archive endpoint.
//!
//! Each regular file in the mission directory is streamed in one POST, with its
//! metadata envelope as JSON in the `X-MDM-Meta` header. Files are
//! independent: one failed upload never stops the rest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use url::Url;
use uxv_schema::{DetectionRecord, StreamRecord, TelemetryRecord};

use crate::error::ArchiveError;
use crate::metrics;

pub const META_HEADER: &str = "X-MDM-Meta";
pub const API_KEY_HEADER: &str = "X-API-Key";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CLASSIFICATION: &str = "UNCLASS";

const NDJSON: &str = "application/x-ndjson";
const OCTET_STREAM: &str = "application/octet-stream";
const FALLBACK_OBJECT_TYPE: &str = "log";

/// Content types by lowercase extension
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("jsonl", NDJSON),
    ("ndjson", NDJSON),
    ("json", "application/json"),
    ("csv", "text/csv"),
    ("txt", "text/plain"),
    ("log", "text/plain"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("xml", "application/xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("mp4", "video/mp4"),
    ("mkv", "video/x-matroska"),
    ("wav", "audio/x-wav"),
    ("pcap", "application/vnd.tcpdump.pcap"),
    ("gz", "application/gzip"),
    ("zip", "application/zip"),
    ("tar", "application/x-tar"),
    ("pdf", "application/pdf"),
];

/// Guess a content type from the file extension
pub fn detect_content_type(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return OCTET_STREAM;
    };
    let ext = ext.to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, ct)| *ct)
        .unwrap_or(OCTET_STREAM)
}

/// Object type from a recorded file name: the stream it belongs to, or `log`
pub fn infer_object_type(file_name: &str) -> &'static str {
    [TelemetryRecord::STREAM_NAME, DetectionRecord::STREAM_NAME]
        .into_iter()
        .find(|stream| file_name.starts_with(stream))
        .unwrap_or(FALLBACK_OBJECT_TYPE)
}

/// Metadata sent alongside every archived file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEnvelope {
    pub mission_id: String,
    pub logical_name: String,
    pub object_type: String,
    pub content_type: String,
    /// Unix seconds
    pub capture_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_run_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl MetadataEnvelope {
    /// JSON for the metadata header. Non-ASCII characters are `\u` escaped
    /// since header values must be visible ASCII.
    pub fn header_value(&self) -> Result<HeaderValue, ArchiveError> {
        let json = serde_json::to_string(self)?;
        let mut escaped = String::with_capacity(json.len());
        for c in json.chars() {
            if c.is_ascii() {
                escaped.push(c);
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    escaped.push_str(&format!("\\u{:04x}", unit));
                }
            }
        }
        HeaderValue::from_str(&escaped).map_err(|e| ArchiveError::Header(e.to_string()))
    }
}

/// Archive endpoint settings
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub sensor: Option<String>,
    pub platform: Option<String>,
    pub classification: Option<String>,
    pub pipeline_run_id: Option<String>,
    /// Added to every envelope after the defaults
    pub tags: BTreeMap<String, String>,
}

impl ForwarderConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            sensor: None,
            platform: None,
            classification: Some(DEFAULT_CLASSIFICATION.to_string()),
            pipeline_run_id: None,
            tags: BTreeMap::new(),
        }
    }
}

/// Overrides for a single [`ArchiveForwarder::ingest_path`] upload
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub logical_name: Option<String>,
    pub object_type: Option<String>,
    pub content_type: Option<String>,
    pub tags: BTreeMap<String, String>,
}

/// Per-mission forwarding report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardOutcome {
    pub succeeded: usize,
    pub failed: usize,
    /// `(file name, error)` for each failed file
    pub failures: Vec<(String, String)>,
}

/// Capability invoked once when a mission closes
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Forward every file in `mission_dir`. Never fails; problems are
    /// reported in the outcome and logged.
    async fn forward(&self, mission_id: &str, mission_dir: &Path) -> ForwardOutcome;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Used when forwarding is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopArchiver;

#[async_trait]
impl Archiver for NoopArchiver {
    async fn forward(&self, mission_id: &str, _mission_dir: &Path) -> ForwardOutcome {
        debug!(mission_id, "Forwarding disabled");
        ForwardOutcome::default()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// HTTP client for the archive endpoint
pub struct ArchiveForwarder {
    http: Client,
    config: ForwarderConfig,
}

impl ArchiveForwarder {
    pub fn new(config: ForwarderConfig) -> Result<Self, ArchiveError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    fn envelope(
        &self,
        mission_id: &str,
        logical_name: String,
        object_type: String,
        content_type: String,
        extra_tags: BTreeMap<String, String>,
    ) -> MetadataEnvelope {
        let mut tags = BTreeMap::from([("source".to_string(), "ground".to_string())]);
        tags.extend(self.config.tags.clone());
        tags.extend(extra_tags);

        MetadataEnvelope {
            mission_id: mission_id.to_string(),
            logical_name,
            object_type,
            content_type,
            capture_time: chrono::Utc::now().timestamp(),
            sensor: self.config.sensor.clone(),
            platform: self.config.platform.clone(),
            classification: self.config.classification.clone(),
            pipeline_run_id: self.config.pipeline_run_id.clone(),
            tags,
        }
    }

    /// Upload one file and return the archive's JSON receipt.
    ///
    /// A non-JSON 2xx body is returned as `{"ok": true, "raw_body": ...}`.
    pub async fn ingest_path(
        &self,
        mission_id: &str,
        path: &Path,
        options: IngestOptions,
    ) -> Result<serde_json::Value, ArchiveError> {
        if !path.is_file() {
            return Err(ArchiveError::NotFound(path.to_path_buf()));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let logical_name = options.logical_name.unwrap_or_else(|| file_name.clone());
        let content_type = options
            .content_type
            .unwrap_or_else(|| detect_content_type(path).to_string());
        let object_type = options
            .object_type
            .unwrap_or_else(|| infer_object_type(&file_name).to_string());
        let envelope = self.envelope(
            mission_id,
            logical_name,
            object_type,
            content_type.clone(),
            options.tags,
        );

        let read_err = |source| ArchiveError::Read {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(read_err)?;
        let bytes = file.metadata().await.map_err(read_err)?.len();

        let mut request = self
            .http
            .post(self.config.endpoint.clone())
            .header(META_HEADER, envelope.header_value()?)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, bytes)
            .body(Body::wrap_stream(ReaderStream::new(file)));
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.header(API_KEY_HEADER, key);
        }

        debug!(file = %file_name, bytes, endpoint = %self.config.endpoint, "Uploading to archive");
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            error!(file = %file_name, status = status.as_u16(), body = %text.trim(), "Archive ingest failed");
            return Err(ArchiveError::Status {
                name: file_name,
                status: status.as_u16(),
                body: text.trim().to_string(),
            });
        }

        metrics::archive_bytes(bytes);
        let receipt = serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::json!({ "ok": true, "raw_body": text }));
        info!(file = %file_name, bytes, "Archive ingest ok");
        Ok(receipt)
    }

    async fn mission_files(mission_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(mission_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl Archiver for ArchiveForwarder {
    async fn forward(&self, mission_id: &str, mission_dir: &Path) -> ForwardOutcome {
        let mut outcome = ForwardOutcome::default();

        let files = match Self::mission_files(mission_dir).await {
            Ok(files) => files,
            Err(e) => {
                error!(mission_id, dir = %mission_dir.display(), error = %e, "Cannot list mission directory");
                outcome.failed = 1;
                outcome
                    .failures
                    .push((mission_dir.display().to_string(), format!("mission_dir not readable: {}", e)));
                metrics::archive_transfer("failed");
                return outcome;
            }
        };
        info!(mission_id, files = files.len(), endpoint = %self.config.endpoint, "Forwarding mission");

        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match self.ingest_path(mission_id, &path, IngestOptions::default()).await {
                Ok(_) => {
                    outcome.succeeded += 1;
                    metrics::archive_transfer("ok");
                }
                Err(e) => {
                    warn!(mission_id, file = %name, error = %e, "Forwarding failed");
                    outcome.failed += 1;
                    outcome.failures.push((name, e.to_string()));
                    metrics::archive_transfer("failed");
                }
            }
        }

        info!(
            mission_id,
            files_ingested = outcome.succeeded,
            errors = outcome.failed,
            "Mission forwarding finished"
        );
        outcome
    }
}
