//! HTTP front door: WebSocket upgrades, liveness and health.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::infrastructure::audit::{self, AuditEvent};
use crate::infrastructure::config::{RelaySettings, ServerSettings};
use crate::ws::handler::{self, SessionOptions};
use crate::ws::{Broadcaster, Registry};

pub const LIVENESS_BODY: &str = "WebSocket server is running...\n";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("server stopped with an I/O error: {0}")]
    Serve(#[from] io::Error),
    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Broadcaster,
    pub session: SessionOptions,
    pub max_message_bytes: usize,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, relay: &RelaySettings) -> Self {
        Self {
            broadcaster: Broadcaster::new(registry),
            session: SessionOptions::from(relay),
            max_message_bytes: relay.max_message_bytes,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.broadcaster.registry()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Clients connect on the root path; plain requests there are liveness probes.
/// A request that asks for an upgrade but fails the handshake gets the
/// rejection, not the liveness body.
async fn root_handler(
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
) -> Response {
    match upgrade {
        Ok(ws) => upgrade_socket(ws, state),
        Err(_) if !is_upgrade_attempt(&headers) => liveness().into_response(),
        Err(rejection) => {
            warn!(error = %rejection, "WebSocket handshake rejected");
            rejection.into_response()
        }
    }
}

fn is_upgrade_attempt(headers: &HeaderMap) -> bool {
    headers.contains_key(header::UPGRADE)
        || headers.contains_key(header::SEC_WEBSOCKET_KEY)
        || headers.contains_key(header::SEC_WEBSOCKET_VERSION)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade_socket(ws, state)
}

fn upgrade_socket(ws: WebSocketUpgrade, state: AppState) -> Response {
    let AppState {
        broadcaster,
        session,
        max_message_bytes,
    } = state;

    ws.max_message_size(max_message_bytes)
        .on_failed_upgrade(|e| warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| handler::handle_socket(socket, broadcaster, session))
}

fn liveness() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        LIVENESS_BODY,
    )
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "connections": state.registry().len(),
    }))
}

/// A bound listener ready to relay.
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: AppState,
}

impl RelayServer {
    pub async fn bind(server: &ServerSettings, relay: &RelaySettings) -> Result<Self, ServerError> {
        let addr = server.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(address = %local_addr, "Server is listening");
        audit::log_audit(AuditEvent::ListenerBound {
            address: local_addr.to_string(),
        });

        Ok(Self {
            listener,
            local_addr,
            state: AppState::new(Arc::new(Registry::new()), relay),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.state.registry())
    }

    /// Serves until `shutdown` resolves, then stops accepting and closes
    /// every open connection.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let registry = self.registry();
        let router = build_router(self.state);

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let closing = registry.close_all();
                info!(connections = closing, "Stopped accepting, closing connections");
            })
            .await?;
        Ok(())
    }

    /// Runs the server on a background task.
    pub fn spawn(self) -> ServerHandle {
        let addr = self.local_addr;
        let registry = self.registry();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(self.serve(async move {
            let _ = shutdown_rx.await;
        }));

        ServerHandle {
            addr,
            registry,
            shutdown_tx,
            task,
        }
    }
}

/// Handle to a server started with [`RelayServer::spawn`].
pub struct ServerHandle {
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn shutdown(self) -> Result<(), ServerError> {
        let _ = self.shutdown_tx.send(());
        self.task.await?
    }
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn run_server<F>(
    server: &ServerSettings,
    relay: &RelaySettings,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    RelayServer::bind(server, relay).await?.serve(shutdown).await
}
