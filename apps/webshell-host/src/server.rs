use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use chunk_transport::FrameKind;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::HostConfig;
use crate::process::{ProcessSpawner, PtySpawner};
use crate::relay::relay;
use crate::HostError;

#[derive(Clone)]
pub struct AppState {
    spawner: Arc<dyn ProcessSpawner>,
    frame: FrameKind,
}

impl AppState {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, frame: FrameKind) -> Self {
        Self { spawner, frame }
    }
}

/// WebSocket shell endpoint at `/`, plus `/health`. Any origin is accepted.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let process = match state.spawner.spawn() {
        Ok(process) => process,
        Err(err) => {
            error!(target: "webshell_host::server", error = %err, "could not start shell");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "failed to start shell".into(),
                })))
                .await;
            return;
        }
    };
    info!(target: "webshell_host::server", "connection accepted");
    let end = relay(socket, process, state.frame).await;
    info!(target: "webshell_host::server", ?end, "connection finished");
}

/// Binds `config.addr` and serves until the listener fails.
pub async fn serve(config: HostConfig) -> Result<(), HostError> {
    let listener = TcpListener::bind(config.addr)
        .await
        .map_err(|source| HostError::Bind {
            addr: config.addr,
            source,
        })?;
    let state = AppState::new(Arc::new(PtySpawner::from_config(&config)), config.frame);
    serve_on(listener, state).await
}

pub async fn serve_on(listener: TcpListener, state: AppState) -> Result<(), HostError> {
    if let Ok(addr) = listener.local_addr() {
        info!(target: "webshell_host::server", %addr, "listening");
    }
    axum::serve(listener, router(state))
        .await
        .map_err(HostError::Serve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::EchoSpawner;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState::new(Arc::new(EchoSpawner::new()), FrameKind::Text))
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn health_reports_ok() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn any_origin_is_allowed() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "https://elsewhere.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn plain_get_on_the_shell_endpoint_is_rejected() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
