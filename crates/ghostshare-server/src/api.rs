use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;

use ghostshare_shared::constants::{ROOM_CAPACITY, WS_PATH};
use ghostshare_shared::RoomId;

use crate::broker::Broker;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::socket;

#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = build_cors(&state.config.allowed_origins);

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/rooms/:room_id", get(room_status))
        .route(WS_PATH, get(ws_upgrade));

    // Serve a built web client, falling back to index.html for client-side routes.
    if let Some(dir) = &state.config.static_dir {
        let index = ServeFile::new(dir.join("index.html"));
        router = router.fallback_service(ServeDir::new(dir).fallback(index));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse::<HeaderValue>().ok())
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    rooms: usize,
    connections: usize,
    room_capacity: usize,
}

#[derive(Serialize)]
struct RoomStatusResponse {
    room: RoomId,
    participants: usize,
    full: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        rooms: state.broker.registry.room_count().await,
        connections: state.broker.relay.connection_count().await,
        room_capacity: ROOM_CAPACITY,
    })
}

async fn room_status(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomStatusResponse>, ServerError> {
    let room = RoomId(room_id);
    let members = state.broker.registry.members(&room).await;
    if members.is_empty() {
        return Err(ServerError::RoomNotFound(room));
    }

    Ok(Json(RoomStatusResponse {
        room,
        participants: members.len(),
        full: members.len() >= ROOM_CAPACITY,
    }))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |stream| socket::handle_socket(stream, state.broker))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Starting HTTP/WebSocket server");
    serve_on(listener, state).await
}

pub async fn serve_on(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
