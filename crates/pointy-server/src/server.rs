use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use pointy_core::ConnectionId;
use pointy_engine::SessionService;
use pointy_telemetry::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};

use crate::client::{self, ClientRegistry};
use crate::handlers;

/// Where client frames come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Ingress {
    /// Clients connect to `/ws`; connection ids are minted here.
    #[default]
    Websocket,
    /// An external gateway holds the sockets and forwards frames to
    /// `/gateway/connections/{id}` under its own connection ids. `/ws` is not
    /// served, since replies to ids minted here would never reach the gateway.
    Gateway,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval: Duration,
    pub ingress: Ingress,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            heartbeat_interval: Duration::from_secs(30),
            ingress: Ingress::Websocket,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
    pub registry: Arc<ClientRegistry>,
    pub message_tx: mpsc::Sender<(ConnectionId, String)>,
    pub prometheus: Option<PrometheusHandle>,
    pub heartbeat_interval: Duration,
}

pub fn build_router(state: AppState, ingress: Ingress) -> Router {
    let router = match ingress {
        Ingress::Websocket => Router::new().route("/ws", get(ws_handler)),
        Ingress::Gateway => Router::new().route(
            "/gateway/connections/{connection_id}",
            post(gateway_frame).delete(gateway_disconnect),
        ),
    };
    router
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. The registry is passed in because the service's pusher
/// already delivers through it.
pub async fn start(
    config: ServerConfig,
    service: Arc<SessionService>,
    registry: Arc<ClientRegistry>,
    prometheus: Option<PrometheusHandle>,
) -> Result<ServerHandle, std::io::Error> {
    let cleanup_service = Arc::clone(&service);
    let cleanup = client::start_cleanup_task(
        Arc::clone(&registry),
        config.heartbeat_interval,
        config.heartbeat_interval * 3,
        move |connection_id| {
            let service = Arc::clone(&cleanup_service);
            tokio::spawn(async move {
                forget(&service, &connection_id).await;
            });
        },
    );

    let (msg_tx, msg_rx) = mpsc::channel::<(ConnectionId, String)>(1024);
    let rpc = tokio::spawn(process_messages(
        msg_rx,
        Arc::clone(&service),
        Arc::clone(&registry),
    ));

    let state = AppState {
        service,
        registry,
        message_tx: msg_tx,
        prometheus,
        heartbeat_interval: config.heartbeat_interval,
    };

    let router = build_router(state, config.ingress);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, ingress = ?config.ingress, "pointy server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
        rpc,
        cleanup,
    })
}

/// Keeps background tasks alive; aborts them on `shutdown`.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
    rpc: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn shutdown(self) {
        self.server.abort();
        self.rpc.abort();
        self.cleanup.abort();
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection_id, rx) = state.registry.register();
    tracing::info!(connection_id = %connection_id, "websocket client connected");
    metrics::counter!(WS_CONNECTIONS_TOTAL).increment(1);
    metrics::gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    client::handle_ws_connection(
        socket,
        connection_id.clone(),
        rx,
        Arc::clone(&state.registry),
        state.message_tx,
        state.heartbeat_interval,
    )
    .await;

    metrics::gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    tracing::info!(connection_id = %connection_id, "websocket client disconnected");
    forget(&state.service, &connection_id).await;
}

/// One frame forwarded by the gateway; the reply goes back in the response body.
async fn gateway_frame(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
    body: String,
) -> impl IntoResponse {
    let connection_id = ConnectionId::from_raw(connection_id);
    axum::Json(handlers::handle_frame(&state.service, &connection_id, &body).await)
}

async fn gateway_disconnect(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> StatusCode {
    forget(&state.service, &ConnectionId::from_raw(connection_id)).await;
    StatusCode::NO_CONTENT
}

async fn forget(service: &SessionService, connection_id: &ConnectionId) {
    if let Err(e) = service.disconnect(connection_id).await {
        tracing::warn!(connection_id = %connection_id, error = %e, "failed to forget connection");
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "connections": state.registry.count(),
        "actions": handlers::ACTIONS,
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, pointy_telemetry::render(handle)).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// Each frame runs on its own task so a slow session never blocks the others.
async fn process_messages(
    mut rx: mpsc::Receiver<(ConnectionId, String)>,
    service: Arc<SessionService>,
    registry: Arc<ClientRegistry>,
) {
    while let Some((connection_id, raw)) = rx.recv().await {
        let service = Arc::clone(&service);
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let response = handlers::handle_frame(&service, &connection_id, &raw).await;
            match registry.sender(&connection_id) {
                Some(tx) => {
                    if tx.send(response.to_json()).await.is_err() {
                        tracing::debug!(connection_id = %connection_id, "client left before reply");
                    }
                }
                None => tracing::debug!(connection_id = %connection_id, "client left before reply"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointy_core::mock::MockPusher;
    use pointy_core::retry::RetryPolicy;
    use pointy_core::{Clock, SystemClock};
    use pointy_engine::ChangeNotifier;
    use pointy_store::{Database, SqliteInterestRegistry, SqliteLockManager, SqliteSessionStore};

    type Fixture = (Arc<SessionService>, Arc<MockPusher>, Arc<SqliteInterestRegistry>);

    fn service() -> Arc<SessionService> {
        fixture().0
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let timeout = Duration::from_secs(3600);
        let interest = Arc::new(SqliteInterestRegistry::new(db.clone(), clock.clone(), timeout));
        let pusher = Arc::new(MockPusher::new());
        let notifier = Arc::new(ChangeNotifier::new(
            interest.clone(),
            pusher.clone(),
            4,
            Duration::from_millis(750),
        ));
        let sessions = Arc::new(SqliteSessionStore::new(db.clone(), clock.clone(), notifier, timeout));
        let locks = Arc::new(SqliteLockManager::new(
            db,
            clock.clone(),
            RetryPolicy::new(Duration::from_millis(5), Duration::from_secs(1)),
            Duration::from_secs(1),
        ));
        let service = Arc::new(SessionService::new(
            locks,
            sessions,
            interest.clone(),
            pusher.clone(),
            clock,
            timeout,
        ));
        (service, pusher, interest)
    }

    fn config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn server_starts_on_random_port() {
        let registry = Arc::new(ClientRegistry::new(16));
        let handle = start(config(), service(), registry, None).await.unwrap();
        assert!(handle.port > 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn health_endpoint() {
        let registry = Arc::new(ClientRegistry::new(16));
        let handle = start(config(), service(), registry, None).await.unwrap();

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["actions"].as_array().unwrap().len(), 6);
        handle.shutdown();
    }

    #[tokio::test]
    async fn metrics_disabled_without_recorder() {
        let registry = Arc::new(ClientRegistry::new(16));
        let handle = start(config(), service(), registry, None).await.unwrap();

        let url = format!("http://127.0.0.1:{}/metrics", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 404);
        handle.shutdown();
    }

    #[tokio::test]
    async fn gateway_ingress_uses_gateway_connection_ids() {
        use pointy_core::{InterestRegistry, Message};

        let (service, pusher, interest) = fixture();
        let registry = Arc::new(ClientRegistry::new(16));
        let config = ServerConfig {
            ingress: Ingress::Gateway,
            ..config()
        };
        let handle = start(config, service, registry, None).await.unwrap();
        let base = format!("http://127.0.0.1:{}", handle.port);
        let client = reqwest::Client::new();

        // Local sockets would carry ids the gateway can't deliver to.
        let resp = client.get(format!("{base}/ws")).send().await.unwrap();
        assert_eq!(resp.status(), 404);

        let frame = serde_json::json!({
            "action": "session.start",
            "id": 1,
            "data": {"facilitator": {"name": "Alice", "userID": "u0"}}
        });
        let reply: serde_json::Value = client
            .post(format!("{base}/gateway/connections/gw-abc"))
            .body(frame.to_string())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply["success"], true);
        assert_eq!(reply["id"], 1);

        let gw = ConnectionId::from_raw("gw-abc");
        let pushed = pusher.deliveries_to(&gw);
        assert!(matches!(pushed.as_slice(), [Message::SessionCreated(_)]));

        let session_id = pointy_core::SessionId::from_raw(
            reply["result"]["body"]["sessionID"].as_str().unwrap(),
        );
        assert_eq!(interest.list_active_watchers(&session_id).await.unwrap(), vec![gw]);

        let resp = client
            .delete(format!("{base}/gateway/connections/gw-abc"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
        assert!(interest.list_active_watchers(&session_id).await.unwrap().is_empty());

        handle.shutdown();
    }

    #[tokio::test]
    async fn websocket_ingress_has_no_gateway_routes() {
        let registry = Arc::new(ClientRegistry::new(16));
        let handle = start(config(), service(), registry, None).await.unwrap();
        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/gateway/connections/x", handle.port))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        handle.shutdown();
    }
}
