//! HTTP entry point: the `/ws` upgrade, auth gate and connection bootstrap.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info};

use lattice_core::{ClusterContext, Engine};

use crate::auth;
use crate::connection::{self, MAX_MESSAGE_SIZE};
use crate::hub::HubHandle;

/// State shared by every upgrade request.
pub struct GatewayState {
    engine: Arc<Engine>,
    ctx: ClusterContext,
    hub: HubHandle,
    serials: AtomicU64,
}

impl GatewayState {
    pub fn new(engine: Arc<Engine>, ctx: ClusterContext, hub: HubHandle) -> Self {
        Self {
            engine,
            ctx,
            hub,
            serials: AtomicU64::new(1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
    client_id: Option<String>,
}

/// Builds the gateway router. One route: `GET /ws`.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

async fn upgrade(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let client_id = if state.engine.auth_enabled() {
        let token = query.token.unwrap_or_default();
        match auth::validate(&state.engine.config().jwt.access_secret, &token) {
            Ok(client_id) => client_id,
            Err(error) => {
                debug!(%error, "rejecting upgrade");
                return (StatusCode::UNAUTHORIZED, error.to_string()).into_response();
            }
        }
    } else {
        match query.client_id {
            Some(client_id) if !client_id.is_empty() => client_id,
            _ => return (StatusCode::BAD_REQUEST, "missing client_id").into_response(),
        }
    };

    let serial = state.serials.fetch_add(1, Ordering::Relaxed);
    info!(client_id = %client_id, serial, "accepting websocket");

    // Any prior connection for this id is torn down by the hub before the
    // new record is inserted.
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            connection::serve(
                socket,
                client_id,
                serial,
                state.hub.clone(),
                state.ctx.clone(),
                Arc::clone(&state.engine),
            )
        })
        .into_response()
}

/// Binds the listener and serves until the context's shutdown token fires.
/// A bind failure is fatal for the process.
pub async fn serve(state: Arc<GatewayState>, listen_addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "gateway listening");

    let shutdown = state.ctx.shutdown().clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
