//! Chat REST fallback surface, used when the data-channel binding isn't
//! available: connect, SSE subscribe with resume, and send.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::chat::engine::EVENT_TYPE_MESSAGE;
use crate::error::RelayError;
use crate::http::AppState;

const MIN_TEXT_LEN: usize = 1;
const MAX_TEXT_LEN: usize = 2000;
const MIN_DISPLAY_NAME_LEN: usize = 1;
const MAX_DISPLAY_NAME_LEN: usize = 80;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Deserialize)]
pub struct ConnectRequest {
    #[serde(rename = "streamKey")]
    stream_key: String,
}

#[derive(Serialize)]
pub struct ConnectResponse {
    #[serde(rename = "chatSessionId")]
    chat_session_id: uuid::Uuid,
}

/// `POST /api/chat/connect`
pub async fn connect(State(state): State<AppState>, Json(request): Json<ConnectRequest>) -> Response {
    let chat_session_id = state.chat.connect(&request.stream_key).await;
    Json(ConnectResponse { chat_session_id }).into_response()
}

fn last_event_id(headers: &HeaderMap) -> u64 {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// `GET /api/chat/sse/:id`: `event: history` once, then `event: message`
/// with monotonic `id:` lines; resumable via `Last-Event-ID`.
pub async fn sse(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RelayError> {
    let (receiver, subscription, backlog) = state.chat.subscribe(id, last_event_id(&headers)).await?;

    let history_event = Event::default().event("history").json_data(&backlog).unwrap();

    let live = stream::unfold((receiver, subscription), |(mut receiver, subscription)| async move {
        let event = receiver.recv().await?;
        let sse_event = Event::default().event(EVENT_TYPE_MESSAGE).id(event.id.to_string()).json_data(&event).ok()?;
        Some((Ok::<_, Infallible>(sse_event), (receiver, subscription)))
    });

    let body = stream::once(async move { Ok::<_, Infallible>(history_event) }).chain(live);

    Ok(Sse::new(body).keep_alive(KeepAlive::new().interval(KEEPALIVE_INTERVAL)))
}

#[derive(Deserialize)]
pub struct SendRequest {
    text: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

/// `POST /api/chat/send/:id`
pub async fn send(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Json(request): Json<SendRequest>,
) -> Result<Response, RelayError> {
    let text = request.text.trim();
    let display_name = request.display_name.trim();

    if text.chars().count() < MIN_TEXT_LEN || text.chars().count() > MAX_TEXT_LEN {
        return Err(RelayError::LengthInvalid("text"));
    }
    if display_name.chars().count() < MIN_DISPLAY_NAME_LEN || display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(RelayError::LengthInvalid("displayName"));
    }

    state.chat.send(id, text, display_name).await?;
    Ok(axum::http::StatusCode::NO_CONTENT.into_response())
}
