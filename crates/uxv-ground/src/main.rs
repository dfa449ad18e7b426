//! uxv-ground binary entry point

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use uxv_ground::health::{self, ServerState};
use uxv_ground::{ArchiveForwarder, Archiver, Args, GroundServer, MissionRecorder, NoopArchiver};
use uxv_transport::ServerChannel;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Resolve on SIGTERM or ctrl-c
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = tokio::signal::ctrl_c() => info!("ctrl-c received"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("ctrl-c received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = args.into_config().context("invalid configuration")?;

    // Certificates are loaded before the listener binds
    let channel = ServerChannel::bind(&config.bind_addr, &config.tls, config.tuning)
        .await
        .context("failed to start ground channel")?;
    let secure = channel.is_secure();

    let archiver: Arc<dyn Archiver> = match &config.archive {
        Some(archive) => {
            info!(endpoint = %archive.endpoint, "Archive forwarding on close enabled");
            Arc::new(ArchiveForwarder::new(archive.clone()).context("failed to build archive client")?)
        }
        None => {
            info!("Archive forwarding disabled");
            Arc::new(NoopArchiver)
        }
    };

    let recorder = Arc::new(
        MissionRecorder::open(
            &config.missions_root,
            config.mission_id.clone(),
            archiver,
            config.recorder,
        )
        .await
        .context("failed to open mission")?,
    );

    let shutdown = CancellationToken::new();

    let health_task = config.metrics_addr.map(|addr| {
        let state = ServerState {
            recorder: Arc::clone(&recorder),
            secure,
        };
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = health::run_server(addr, state, shutdown).await {
                error!(error = %e, "Health server failed");
            }
        })
    });

    let server = GroundServer::new(channel, Arc::clone(&recorder), config.shutdown_grace);
    info!(
        addr = %server.local_addr(),
        mode = if secure { "mtls" } else { "insecure" },
        mission_id = %recorder.mission_id(),
        "Ground station started"
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    server.run(shutdown.clone()).await;
    shutdown.cancel();

    // Releases stream files, then forwards the mission when enabled
    if let Some(outcome) = recorder.close().await {
        if outcome.failed > 0 {
            for (file, reason) in &outcome.failures {
                warn!(file = %file, reason = %reason, "File was not archived");
            }
        }
    }

    if let Some(task) = health_task {
        let _ = task.await;
    }

    info!("Ground station stopped");
    Ok(())
}
