use std::path::PathBuf;
use std::time::{Duration, Instant};

use uxv_probe::probe::probe;
use uxv_probe::{ProbeOutcome, ProbeSettings, Prober};
use uxv_transport::{ChannelTuning, ConnectivityState, ServerChannel, TlsSettings};

fn certs(name: &str) -> PathBuf {
    PathBuf::from(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../transport/tests/fixtures/certs"
    ))
    .join(name)
}

fn settings(addr: &str, tls: TlsSettings, timeout: Duration) -> ProbeSettings {
    ProbeSettings {
        addr: addr.to_string(),
        tls,
        timeout,
        watch_state: true,
        tuning: ChannelTuning::default(),
    }
}

/// Accept and greet connections until the test ends
async fn spawn_server(tls: TlsSettings) -> String {
    let server = ServerChannel::bind("127.0.0.1:0", &tls, ChannelTuning::default())
        .await
        .unwrap();
    let addr = server.local_addr().to_string();
    tokio::spawn(async move {
        loop {
            let Ok(incoming) = server.accept().await else { continue };
            tokio::spawn(async move {
                let _ = incoming.establish().await;
            });
        }
    });
    addr
}

fn unused_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_plaintext_ready() {
    let addr = spawn_server(TlsSettings::disabled()).await;
    let outcome = probe(&settings(&addr, TlsSettings::disabled(), Duration::from_secs(5))).await;
    assert!(outcome.is_ready(), "{:?}", outcome);
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn test_mutual_tls_ready() {
    let addr = spawn_server(TlsSettings::mutual(certs("trusted"))).await;
    let tls = TlsSettings::mutual(certs("trusted")).with_override_host("localhost");

    let prober = Prober::new(&settings(&addr, tls, Duration::from_secs(5))).unwrap();
    match prober.wait_ready().await {
        ProbeOutcome::Ready { mode, elapsed } => {
            assert_eq!(mode, "mtls");
            assert!(elapsed < Duration::from_secs(5));
        }
        other => panic!("expected ready, got {:?}", other),
    }
    assert_eq!(prober.channel().state(), ConnectivityState::Ready);
}

#[tokio::test]
async fn test_untrusted_client_is_never_ready() {
    let addr = spawn_server(TlsSettings::mutual(certs("trusted"))).await;
    let tls = TlsSettings::mutual(certs("untrusted-client")).with_override_host("localhost");

    let started = Instant::now();
    let outcome = probe(&settings(&addr, tls, Duration::from_secs(1))).await;
    assert!(started.elapsed() < Duration::from_secs(3));

    match outcome {
        ProbeOutcome::NotReady { last_error } => assert!(last_error.is_some()),
        other => panic!("expected not ready, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hostname_mismatch_is_not_ready() {
    let addr = spawn_server(TlsSettings::mutual(certs("trusted"))).await;
    // Dialing 127.0.0.1 without an override: the leaf only names localhost
    let outcome = probe(&settings(
        &addr,
        TlsSettings::mutual(certs("trusted")),
        Duration::from_millis(800),
    ))
    .await;
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_missing_certs_is_config_failure() {
    let tmp = tempfile::TempDir::new().unwrap();
    let outcome = probe(&settings(
        "127.0.0.1:50051",
        TlsSettings::mutual(tmp.path()),
        Duration::from_secs(5),
    ))
    .await;
    match outcome {
        ProbeOutcome::ConfigFailure(reason) => assert!(reason.contains("ca.crt")),
        other => panic!("expected config failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_nothing_listening_respects_timeout() {
    let addr = format!("127.0.0.1:{}", unused_port());
    let started = Instant::now();
    let outcome = probe(&settings(&addr, TlsSettings::disabled(), Duration::from_millis(600))).await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(600));
    assert!(elapsed < Duration::from_secs(2), "blocked for {:?}", elapsed);
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_retries_until_server_appears() {
    let port = unused_port();
    let addr = format!("127.0.0.1:{}", port);

    let bind_addr = addr.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let server = ServerChannel::bind(&bind_addr, &TlsSettings::disabled(), ChannelTuning::default())
            .await
            .unwrap();
        loop {
            if let Ok(incoming) = server.accept().await {
                let _ = incoming.establish().await;
            }
        }
    });

    let outcome = probe(&settings(&addr, TlsSettings::disabled(), Duration::from_secs(5))).await;
    assert!(outcome.is_ready(), "{:?}", outcome);
}
