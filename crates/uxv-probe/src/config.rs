use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use uxv_transport::{ChannelTuning, TlsSettings};

use crate::probe::{ProbeError, ProbeSettings};

/// uxv-probe: exits 0 when READY, 1 when not ready in time, 2 on bad setup
#[derive(Parser, Debug, Clone)]
#[command(name = "uxv-probe")]
#[command(about = "Ground channel readiness probe (mutual TLS by default)")]
pub struct Args {
    /// host:port of the ground station
    #[arg(long, env = "ADDR", default_value = "localhost:50051")]
    pub addr: String,

    /// Directory containing ca.crt, client.crt and client.key
    #[arg(long, env = "CERT_DIR", default_value = "creds")]
    pub cert_dir: PathBuf,

    /// Seconds to wait for READY
    #[arg(long, env = "PROBE_TIMEOUT", default_value = "60")]
    pub timeout: f64,

    /// Name to verify the server certificate against when dialing an IP
    #[arg(long, env = "TLS_OVERRIDE_HOST")]
    pub override_host: Option<String>,

    /// TLS on/off from the environment; `--insecure` wins when given
    #[arg(
        long,
        env = "TLS",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub tls: bool,

    /// Plaintext channel
    #[arg(long)]
    pub insecure: bool,

    /// Log every connectivity state change
    #[arg(long, env = "PROBE_WATCH")]
    pub watch: bool,

    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Args {
    pub fn into_settings(self) -> Result<ProbeSettings, ProbeError> {
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(ProbeError::InvalidTimeout(self.timeout));
        }

        let tls = if self.tls && !self.insecure {
            let tls = TlsSettings::mutual(self.cert_dir);
            match self.override_host.filter(|h| !h.is_empty()) {
                Some(host) => tls.with_override_host(host),
                None => tls,
            }
        } else {
            TlsSettings::disabled()
        };

        Ok(ProbeSettings {
            addr: self.addr,
            tls,
            timeout: Duration::from_secs_f64(self.timeout),
            watch_state: self.watch,
            tuning: ChannelTuning::default(),
        })
    }
}
