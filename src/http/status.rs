//! Stream status: JSON listing/lookup plus a per-session SSE stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::error::RelayError;
use crate::http::AppState;

#[derive(Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    key: Option<String>,
}

/// `GET /api/status` (list of public streams) or `GET /api/status?key=<k>`
/// (one stream). Returns 503 if status reporting is disabled.
pub async fn index(State(state): State<AppState>, Query(query): Query<StatusQuery>) -> Result<Response, RelayError> {
    if state.config.disable_status {
        return Ok(StatusCode::SERVICE_UNAVAILABLE.into_response());
    }

    match query.key {
        Some(stream_key) => {
            let session = state.sessions.get_by_stream_key(&stream_key).await.ok_or(RelayError::NoActiveStream)?;
            Ok(Json(session.snapshot().await).into_response())
        }
        None => Ok(Json(state.sessions.list_session_states(false).await).into_response()),
    }
}

#[derive(serde::Serialize)]
struct LayerSet {
    layers: Vec<LayerEntry>,
}

#[derive(serde::Serialize)]
struct LayerEntry {
    #[serde(rename = "encodingId")]
    encoding_id: String,
}

/// `GET /api/status/:id` SSE: `event: status` every 5 s for either a host
/// or a viewer id. A viewer id also gets one initial `event: layers`.
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RelayError> {
    let (session, layers_event) = if let Some(session) = state.sessions.get_session_by_host_id(id).await {
        (session, None)
    } else if let Some((session, viewer)) = state.sessions.get_session_and_viewer_by_id(id).await {
        let layers = match session.host().await {
            Some(host) => {
                let video = LayerSet {
                    layers: host.video_rids().await.into_iter().map(|encoding_id| LayerEntry { encoding_id }).collect(),
                };
                let audio = LayerSet {
                    layers: host.audio_rids().await.into_iter().map(|encoding_id| LayerEntry { encoding_id }).collect(),
                };
                serde_json::json!({"1": video, "2": audio})
            }
            None => serde_json::json!({}),
        };
        let _ = viewer;
        (session, Some(Event::default().event("layers").json_data(layers).unwrap()))
    } else {
        return Err(RelayError::InvalidSession);
    };

    let ticks = stream::unfold((), move |()| {
        let session = session.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let snapshot = session.snapshot().await;
            let event = Event::default().event("status").json_data(snapshot).ok()?;
            Some((Ok::<_, Infallible>(event), ()))
        }
    });

    let body = match layers_event {
        Some(event) => stream::once(async move { Ok::<_, Infallible>(event) }).chain(ticks).left_stream(),
        None => ticks.right_stream(),
    };

    Ok(Sse::new(body).keep_alive(KeepAlive::default()))
}
