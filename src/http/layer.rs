//! `POST /api/layer/:id`: switch a viewer's subscribed simulcast layer.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::RelayError;
use crate::http::AppState;

#[derive(Deserialize)]
pub struct LayerChangeRequest {
    #[serde(rename = "mediaId")]
    media_id: String,
    #[serde(rename = "encodingId")]
    encoding_id: String,
}

/// `1` selects the video layer, `2` the audio layer; any other `mediaId` is
/// rejected as an invalid session (matching the reference relay's blanket
/// 400 for an unrecognized media id).
pub async fn change(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    axum::Json(request): axum::Json<LayerChangeRequest>,
) -> Result<Response, RelayError> {
    let viewer = state.sessions.get_viewer_by_id(id).await.ok_or(RelayError::InvalidSession)?;

    match request.media_id.as_str() {
        "1" => viewer.set_video_layer(request.encoding_id).await,
        "2" => viewer.set_audio_layer(request.encoding_id).await,
        _ => return Err(RelayError::InvalidSession),
    }

    Ok(StatusCode::OK.into_response())
}
