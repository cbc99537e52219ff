//! HTTP surface: shared application state and router assembly.

pub mod chat;
pub mod layer;
pub mod status;
pub mod whep;
pub mod whip;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use webrtc::api::API;

use crate::chat::engine::ChatManager;
use crate::config::Config;
use crate::profiles::ProfileStore;
use crate::session::SessionManager;

/// Maximum body size accepted on any route: SDP offers and ICE trickle
/// bodies are small text payloads, but generous headroom avoids surprising
/// a well-behaved client with a large candidate batch.
const MAX_BODY_BYTES: usize = 1_000_000;

/// Shared application state threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub chat: Arc<ChatManager>,
    pub profiles: Arc<ProfileStore>,
    pub api: Arc<API>,
}

/// Assemble the full router: the WHIP/WHEP/layer/status/chat surfaces, plus
/// the ambient middleware stack (tracing, compression, CORS, request id).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/whip", post(whip::create))
        .route("/api/whip/{id}", axum::routing::patch(whip::patch).delete(whip::delete))
        .route("/api/whep", post(whep::create))
        .route("/api/whep/{id}", axum::routing::patch(whep::patch).delete(whep::delete))
        .route("/api/layer/{id}", post(layer::change))
        .route("/api/status", get(status::index))
        .route("/api/status/{id}", get(status::stream))
        .route("/api/chat/connect", post(chat::connect))
        .route("/api/chat/sse/{id}", get(chat::sse))
        .route("/api/chat/send/{id}", post(chat::send))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
