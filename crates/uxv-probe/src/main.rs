//! uxv-probe binary entry point
//!
//! Exit status: 0 READY, 1 not ready within the timeout, 2 setup failure.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use uxv_probe::probe::probe;
use uxv_probe::{Args, ProbeOutcome};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_json);

    let outcome = match args.into_settings() {
        Ok(settings) => {
            info!(
                addr = %settings.addr,
                tls = settings.tls.enabled,
                timeout_secs = settings.timeout.as_secs_f64(),
                "Probing ground channel"
            );
            probe(&settings).await
        }
        Err(e) => ProbeOutcome::ConfigFailure(e.to_string()),
    };

    match &outcome {
        ProbeOutcome::Ready { mode, .. } => info!(mode, "READY"),
        ProbeOutcome::NotReady { last_error } => {
            error!(last_error = last_error.as_deref().unwrap_or("none"), "NOT READY")
        }
        ProbeOutcome::ConfigFailure(reason) => error!(reason = %reason, "Probe configuration failed"),
    }
    ExitCode::from(outcome.exit_code())
}
