//! Channel readiness probing with bounded retries

use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use uxv_transport::{ChannelTuning, ClientChannel, TlsSettings, TransportError};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid timeout {0}: must be a positive number of seconds")]
    InvalidTimeout(f64),

    #[error("failed to configure channel: {0}")]
    Channel(#[from] TransportError),
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub addr: String,
    pub tls: TlsSettings,
    pub timeout: Duration,
    pub watch_state: bool,
    pub tuning: ChannelTuning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { mode: &'static str, elapsed: Duration },
    /// Timed out; carries the last connection error, if any attempt finished
    NotReady { last_error: Option<String> },
    ConfigFailure(String),
}

impl ProbeOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            ProbeOutcome::Ready { .. } => 0,
            ProbeOutcome::NotReady { .. } => 1,
            ProbeOutcome::ConfigFailure(_) => 2,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready { .. })
    }
}

/// Suggestion for handshake failures that look like a server name mismatch
pub fn hostname_hint(error: &TransportError) -> Option<&'static str> {
    let TransportError::Handshake(message) = error else {
        return None;
    };
    let message = message.to_ascii_lowercase();
    let looks_like_name = ["notvalidforname", "not valid for name", "hostname", "certificate"]
        .iter()
        .any(|needle| message.contains(needle));
    looks_like_name.then_some(
        "if the server certificate is issued for 'localhost' but you are dialing an IP, \
         try --addr localhost:<port> or --override-host localhost",
    )
}

pub struct Prober {
    channel: ClientChannel,
    timeout: Duration,
    watch_state: bool,
}

impl Prober {
    /// Build the client channel. Certificate problems surface here.
    pub fn new(settings: &ProbeSettings) -> Result<Self, ProbeError> {
        let channel = ClientChannel::new(&settings.addr, &settings.tls, settings.tuning)?;
        Ok(Self {
            channel,
            timeout: settings.timeout,
            watch_state: settings.watch_state,
        })
    }

    pub fn channel(&self) -> &ClientChannel {
        &self.channel
    }

    /// Retry until the channel is READY or the timeout elapses
    pub async fn wait_ready(&self) -> ProbeOutcome {
        let started = Instant::now();
        let target = self.channel.endpoint().to_string();
        let mode = self.channel.mode();

        let watcher = self.watch_state.then(|| {
            let mut rx = self.channel.subscribe();
            let target = target.clone();
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let state = *rx.borrow_and_update();
                    info!(addr = %target, state = %state, "Connectivity state changed");
                }
            })
        });

        let mut last_error: Option<TransportError> = None;
        let attempts = async {
            let mut backoff = INITIAL_BACKOFF;
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                match self.channel.connect().await {
                    Ok(conn) => {
                        if let Err(e) = conn.close().await {
                            debug!(error = %e, "Closing probe connection failed");
                        }
                        return;
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, retry_in_ms = backoff.as_millis() as u64, "Channel not ready");
                        last_error = Some(e);
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        };
        let result = timeout(self.timeout, attempts).await;

        if let Some(watcher) = watcher {
            watcher.abort();
        }

        match result {
            Ok(()) => {
                let elapsed = started.elapsed();
                info!(addr = %target, mode, elapsed_ms = elapsed.as_millis() as u64, "Channel READY");
                ProbeOutcome::Ready { mode, elapsed }
            }
            Err(_) => {
                match &last_error {
                    Some(e) => warn!(addr = %target, mode, error = %e, "Channel not ready within timeout"),
                    None => warn!(addr = %target, mode, "Channel not ready within timeout"),
                }
                if let Some(hint) = last_error.as_ref().filter(|_| mode == "mtls").and_then(hostname_hint) {
                    warn!("hint: {}", hint);
                }
                ProbeOutcome::NotReady {
                    last_error: last_error.map(|e| e.to_string()),
                }
            }
        }
    }
}

/// Configure and run a probe; configuration errors become
/// [`ProbeOutcome::ConfigFailure`].
pub async fn probe(settings: &ProbeSettings) -> ProbeOutcome {
    match Prober::new(settings) {
        Ok(prober) => prober.wait_ready().await,
        Err(e) => {
            warn!(error = %e, "Probe setup failed");
            ProbeOutcome::ConfigFailure(e.to_string())
        }
    }
}
