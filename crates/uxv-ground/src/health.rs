//! HTTP server for health and metrics endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::encode_metrics;
use crate::recorder::MissionRecorder;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mission_id: String,
    pub mode: &'static str,
    pub open_streams: Vec<String>,
}

#[derive(Clone)]
pub struct ServerState {
    pub recorder: Arc<MissionRecorder>,
    pub secure: bool,
}

/// 200 while the mission is recording, 503 once it has closed
async fn health(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    let closed = state.recorder.is_closed();
    let status_code = if closed {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        Json(HealthResponse {
            status: if closed { "closed" } else { "ok" },
            mission_id: state.recorder.mission_id().to_string(),
            mode: if state.secure { "mtls" } else { "insecure" },
            open_streams: state.recorder.open_streams().await,
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve health/metrics until `shutdown` fires
pub async fn run_server(
    addr: SocketAddr,
    state: ServerState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Health/metrics server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::NoopArchiver;
    use crate::recorder::RecorderOptions;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn create_test_state(tmp: &TempDir) -> ServerState {
        let recorder = MissionRecorder::open(
            tmp.path(),
            Some("health-test".to_string()),
            Arc::new(NoopArchiver),
            RecorderOptions::default(),
        )
        .await
        .unwrap();
        ServerState {
            recorder: Arc::new(recorder),
            secure: true,
        }
    }

    #[tokio::test]
    async fn test_health_ok_while_recording() {
        let tmp = TempDir::new().unwrap();
        let state = create_test_state(&tmp).await;
        state.recorder.write("telemetry", &serde_json::json!({"ts_ns": 1})).await.unwrap();
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["mission_id"], "health-test");
        assert_eq!(json["mode"], "mtls");
        assert_eq!(json["open_streams"], serde_json::json!(["telemetry"]));
    }

    #[tokio::test]
    async fn test_health_unavailable_after_close() {
        let tmp = TempDir::new().unwrap();
        let state = create_test_state(&tmp).await;
        state.recorder.close().await;
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let tmp = TempDir::new().unwrap();
        let app = create_router(create_test_state(&tmp).await);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
