//! Command-line and environment configuration

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use url::Url;
use uxv_transport::{ChannelTuning, Endpoint, TlsSettings, DEFAULT_HANDSHAKE_TIMEOUT};

use crate::archive::ForwarderConfig;
use crate::error::{GroundError, Result};
use crate::recorder::{validate_component, RecorderOptions};

/// uxv-ground: records vehicle telemetry and detections per mission
#[derive(Parser, Debug, Clone)]
#[command(name = "uxv-ground")]
#[command(about = "Ground station ingest server for vehicle telemetry and detections")]
pub struct Args {
    /// Listen address (host:port)
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:50051")]
    pub addr: String,

    /// Require mutual TLS (client certificates verified against ca.crt)
    #[arg(long, env = "TLS")]
    pub tls: bool,

    /// Directory holding ca.crt, server.crt and server.key
    #[arg(long, env = "CERT_DIR", default_value = "creds")]
    pub cert_dir: PathBuf,

    /// Root directory for mission recordings
    #[arg(long, env = "MISSIONS_ROOT", default_value = "missions")]
    pub missions_root: PathBuf,

    /// Mission id (default: mission-YYYYmmdd-HHMMSS, UTC)
    #[arg(long, env = "MISSION_ID")]
    pub mission_id: Option<String>,

    /// sync_data after every record
    #[arg(long, env = "RECORDER_FSYNC")]
    pub fsync: bool,

    /// Archive ingest endpoint, e.g. http://127.0.0.1:8080/ingest
    #[arg(long, env = "MDM_URL")]
    pub archive_url: Option<String>,

    #[arg(long, env = "MDM_API_KEY", hide_env_values = true)]
    pub archive_api_key: Option<String>,

    /// Forward the mission directory to the archive when the mission closes
    #[arg(
        long,
        env = "MDM_INGEST_ON_CLOSE",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub forward_on_close: bool,

    /// Per-request archive timeout
    #[arg(long, env = "MDM_TIMEOUT_SECS", default_value = "60")]
    pub archive_timeout_secs: u64,

    #[arg(long, env = "MDM_SENSOR")]
    pub sensor: Option<String>,

    #[arg(long, env = "MDM_PLATFORM")]
    pub platform: Option<String>,

    #[arg(long, env = "MDM_CLASSIFICATION", default_value = "UNCLASS")]
    pub classification: String,

    #[arg(long, env = "MDM_PIPELINE_RUN_ID")]
    pub pipeline_run_id: Option<String>,

    /// Extra envelope tags as key=value, repeatable or comma separated
    #[arg(long = "tag", env = "MDM_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Largest inbound frame in bytes
    #[arg(long, env = "MAX_MESSAGE_BYTES", default_value = "20971520")]
    pub max_message_bytes: usize,

    #[arg(long, env = "KEEPALIVE_SECS", default_value = "20")]
    pub keepalive_secs: u64,

    /// Health/metrics listen address; disabled when unset
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Seconds in-flight streams get to finish on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value = "5")]
    pub shutdown_grace_secs: u64,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Validated, immutable runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub tls: TlsSettings,
    pub tuning: ChannelTuning,
    pub missions_root: PathBuf,
    pub mission_id: Option<String>,
    pub recorder: RecorderOptions,
    /// `None` when forwarding is disabled or no endpoint is configured
    pub archive: Option<ForwarderConfig>,
    pub metrics_addr: Option<SocketAddr>,
    pub shutdown_grace: Duration,
}

fn parse_tags(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .filter(|(k, _)| !k.trim().is_empty())
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| GroundError::Config(format!("tag {:?} is not key=value", pair)))
        })
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Args {
    pub fn into_config(self) -> Result<Config> {
        Endpoint::parse(&self.addr).map_err(|e| GroundError::Config(e.to_string()))?;

        if let Some(id) = self.mission_id.as_deref().filter(|id| !id.is_empty()) {
            validate_component("mission", id)?;
        }
        if self.max_message_bytes == 0 {
            return Err(GroundError::Config("max message bytes must be positive".into()));
        }
        if self.keepalive_secs == 0 {
            return Err(GroundError::Config("keepalive must be at least one second".into()));
        }

        let archive = match (self.forward_on_close, non_empty(self.archive_url)) {
            (true, Some(raw)) => {
                let endpoint = Url::parse(&raw)
                    .map_err(|e| GroundError::Config(format!("archive url {:?}: {}", raw, e)))?;
                if !matches!(endpoint.scheme(), "http" | "https") {
                    return Err(GroundError::Config(format!(
                        "archive url {:?} must be http or https",
                        raw
                    )));
                }
                if self.archive_timeout_secs == 0 {
                    return Err(GroundError::Config("archive timeout must be positive".into()));
                }
                Some(ForwarderConfig {
                    endpoint,
                    api_key: non_empty(self.archive_api_key),
                    timeout: Duration::from_secs(self.archive_timeout_secs),
                    sensor: non_empty(self.sensor),
                    platform: non_empty(self.platform),
                    classification: non_empty(Some(self.classification)),
                    pipeline_run_id: non_empty(self.pipeline_run_id),
                    tags: parse_tags(&self.tags)?,
                })
            }
            _ => None,
        };

        let tls = if self.tls {
            TlsSettings::mutual(self.cert_dir)
        } else {
            TlsSettings::disabled()
        };

        Ok(Config {
            bind_addr: self.addr,
            tls,
            tuning: ChannelTuning {
                max_message_bytes: self.max_message_bytes,
                keepalive: Duration::from_secs(self.keepalive_secs),
                handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            },
            missions_root: self.missions_root,
            mission_id: non_empty(self.mission_id),
            recorder: RecorderOptions { fsync: self.fsync },
            archive,
            metrics_addr: self.metrics_addr,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        })
    }
}
