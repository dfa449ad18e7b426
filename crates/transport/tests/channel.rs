use std::path::PathBuf;
use std::time::Duration;

use futures_util::stream;
use uxv_schema::{ClientFrame, ErrorCode, Method, ServerFrame, TelemetryRecord};
use uxv_transport::{
    ChannelTuning, ClientChannel, ConnectivityState, IngestClient, ServerChannel, TlsSettings,
    TransportError,
};

fn certs(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/certs")
        .join(name)
}

fn tuning() -> ChannelTuning {
    ChannelTuning {
        handshake_timeout: Duration::from_secs(5),
        ..ChannelTuning::default()
    }
}

/// Accept one connection and return the outcome of its handshake
fn spawn_acceptor(
    server: ServerChannel,
) -> tokio::task::JoinHandle<Result<uxv_transport::Connection, TransportError>> {
    tokio::spawn(async move {
        let incoming = server.accept().await?;
        incoming.establish().await
    })
}

#[tokio::test]
async fn test_plaintext_channel_reaches_ready() {
    let server = ServerChannel::bind("127.0.0.1:0", &TlsSettings::disabled(), tuning())
        .await
        .unwrap();
    assert!(!server.is_secure());
    let addr = server.local_addr();
    let accepted = spawn_acceptor(server);

    let client = ClientChannel::new(&addr.to_string(), &TlsSettings::disabled(), tuning()).unwrap();
    let conn = client.connect().await.unwrap();
    assert!(!conn.is_secure());
    assert_eq!(client.state(), ConnectivityState::Ready);

    let server_side = accepted.await.unwrap().unwrap();
    assert!(!server_side.is_secure());
}

#[tokio::test]
async fn test_mutual_tls_with_override_reaches_ready() {
    let server = ServerChannel::bind("127.0.0.1:0", &TlsSettings::mutual(certs("trusted")), tuning())
        .await
        .unwrap();
    assert!(server.is_secure());
    let addr = server.local_addr();
    let accepted = spawn_acceptor(server);

    // Server leaf only carries DNS:localhost, so dialing the IP needs the override
    let tls = TlsSettings::mutual(certs("trusted")).with_override_host("localhost");
    let client = ClientChannel::new(&addr.to_string(), &tls, tuning()).unwrap();
    assert_eq!(client.mode(), "mtls");

    let conn = client.connect().await.unwrap();
    assert!(conn.is_secure());
    assert_eq!(client.state(), ConnectivityState::Ready);
    assert!(accepted.await.unwrap().unwrap().is_secure());
}

#[tokio::test]
async fn test_hostname_mismatch_without_override_fails() {
    let server = ServerChannel::bind("127.0.0.1:0", &TlsSettings::mutual(certs("trusted")), tuning())
        .await
        .unwrap();
    let addr = server.local_addr();
    let _accepted = spawn_acceptor(server);

    let client =
        ClientChannel::new(&addr.to_string(), &TlsSettings::mutual(certs("trusted")), tuning())
            .unwrap();
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::Handshake(_)), "got {:?}", err);
    assert_eq!(client.state(), ConnectivityState::TransientFailure);
}

#[tokio::test]
async fn test_untrusted_client_certificate_never_ready() {
    let server = ServerChannel::bind("127.0.0.1:0", &TlsSettings::mutual(certs("trusted")), tuning())
        .await
        .unwrap();
    let addr = server.local_addr();
    let accepted = spawn_acceptor(server);

    let tls = TlsSettings::mutual(certs("untrusted-client")).with_override_host("localhost");
    let client = ClientChannel::new(&addr.to_string(), &tls, tuning()).unwrap();

    assert!(client.connect().await.is_err());
    assert_ne!(client.state(), ConnectivityState::Ready);

    let server_err = accepted.await.unwrap().unwrap_err();
    assert!(matches!(server_err, TransportError::Handshake(_)), "got {:?}", server_err);
}

#[tokio::test]
async fn test_rogue_server_is_rejected_by_client() {
    let server = ServerChannel::bind("127.0.0.1:0", &TlsSettings::mutual(certs("rogue")), tuning())
        .await
        .unwrap();
    let addr = server.local_addr();
    let _accepted = spawn_acceptor(server);

    let tls = TlsSettings::mutual(certs("trusted")).with_override_host("localhost");
    let client = ClientChannel::new(&addr.to_string(), &tls, tuning()).unwrap();
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::Handshake(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_missing_certs_fail_before_bind() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let addr = format!("127.0.0.1:{}", port);

    let missing = TlsSettings::mutual("/nonexistent/uxv-certs");
    let err = match ServerChannel::bind(&addr, &missing, tuning()).await {
        Ok(_) => panic!("bind should fail without certificates"),
        Err(e) => e,
    };
    assert!(err.is_config());
    assert!(matches!(err, TransportError::MissingFile(_)));

    // Port was never taken
    assert!(std::net::TcpListener::bind(&addr).is_ok());

    let err = ClientChannel::new(&addr, &missing, tuning()).err().unwrap();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_ingest_client_round_trip() {
    let server = ServerChannel::bind("127.0.0.1:0", &TlsSettings::disabled(), tuning())
        .await
        .unwrap();
    let addr = server.local_addr();

    let handler = tokio::spawn(async move {
        let mut conn = server.accept().await.unwrap().establish().await.unwrap();
        let open: ClientFrame<TelemetryRecord> = conn.recv().await.unwrap().unwrap();
        assert_eq!(open, ClientFrame::open(Method::StreamTelemetry));

        let mut seen = Vec::new();
        loop {
            match conn.recv::<ClientFrame<TelemetryRecord>>().await.unwrap() {
                Some(ClientFrame::Record { record }) => seen.push(record.ts_ns),
                Some(ClientFrame::End) => break,
                other => panic!("unexpected frame {:?}", other),
            }
        }
        conn.send(&ServerFrame::Ack { ok: true }).await.unwrap();
        seen
    });

    let client = IngestClient::new(
        ClientChannel::new(&addr.to_string(), &TlsSettings::disabled(), tuning()).unwrap(),
    );
    let records = (1..=3).map(|i| TelemetryRecord {
        ts_ns: i,
        ..Default::default()
    });
    let ack = client.stream_telemetry(stream::iter(records)).await.unwrap();

    assert!(ack.ok);
    assert_eq!(handler.await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_ingest_client_surfaces_rejection() {
    let server = ServerChannel::bind("127.0.0.1:0", &TlsSettings::disabled(), tuning())
        .await
        .unwrap();
    let addr = server.local_addr();

    tokio::spawn(async move {
        let mut conn = server.accept().await.unwrap().establish().await.unwrap();
        let _open: Option<ClientFrame<serde_json::Value>> = conn.recv().await.unwrap();
        conn.send(&ServerFrame::error(ErrorCode::Internal, "disk full"))
            .await
            .unwrap();
        conn.close().await.unwrap();
    });

    let client = IngestClient::new(
        ClientChannel::new(&addr.to_string(), &TlsSettings::disabled(), tuning()).unwrap(),
    );
    let err = client
        .stream_telemetry(stream::iter(vec![TelemetryRecord::default()]))
        .await
        .unwrap_err();

    match err {
        TransportError::Rejected { code, message } => {
            assert_eq!(code, ErrorCode::Internal);
            assert_eq!(message, "disk full");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}
