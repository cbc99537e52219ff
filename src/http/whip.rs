//! WHIP (ingest) handlers: `POST /api/whip`, `PATCH /api/whip/:id`,
//! `DELETE /api/whip/:id`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::RelayError;
use crate::http::AppState;
use crate::profiles::split_stream_key_and_token;
use crate::session::whip::WhipSession;

/// `POST /api/whip`: accept an SDP offer from an ingest client, authorize it
/// against the stream's profile, and return the non-trickle SDP answer.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, RelayError> {
    let bearer = bearer_token(&headers).ok_or(RelayError::Unauthorized)?;
    let (stream_key, token) = split_stream_key_and_token(&bearer);

    if !state.profiles.authorize(stream_key, token).await {
        return Err(RelayError::Unauthorized);
    }
    let profile = state.profiles.lookup(stream_key).await.ok_or(RelayError::Unauthorized)?;

    let offer = RTCSessionDescription::offer(body).map_err(|err| RelayError::InvalidOffer(err.to_string()))?;

    let pc = Arc::new(state.api.new_peer_connection(crate::rtc::rtc_configuration(&state.config.ice)).await?);

    let host_id = uuid::Uuid::new_v4();
    let stream_session = state.sessions.get_or_add_session(&profile, true).await;

    let on_closed_session = Arc::downgrade(&stream_session);
    let whip_session = Arc::new(WhipSession::new(
        host_id,
        stream_key.to_string(),
        Arc::new(move |_host_id| {
            if let Some(session) = on_closed_session.upgrade() {
                tokio::spawn(async move { session.handle_host_closed().await });
            }
        }),
    ));

    {
        let whip_session = whip_session.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            whip_session.handle_track(track);
            Box::pin(async {})
        }));
    }

    {
        let whip_session = whip_session.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let whip_session = whip_session.clone();
            Box::pin(async move {
                if matches!(state, RTCIceConnectionState::Failed | RTCIceConnectionState::Closed) {
                    whip_session.notify_closed().await;
                }
            })
        }));
    }

    {
        let whip_session = whip_session.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let whip_session = whip_session.clone();
            Box::pin(async move {
                if matches!(state, RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed) {
                    whip_session.notify_closed().await;
                }
            })
        }));
    }

    pc.set_remote_description(offer).await?;
    let answer = pc.create_answer(None).await?;
    let mut gathering_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await?;
    let _ = gathering_complete.recv().await;

    let sdp = pc.local_description().await.map(|d| d.sdp).unwrap_or_default();

    whip_session.set_peer_connection(pc).await;

    stream_session.add_host(whip_session).await?;

    tracing::info!(%stream_key, %host_id, "whip session created");

    Ok((
        StatusCode::CREATED,
        [
            ("content-type", "application/sdp".to_string()),
            ("location", format!("/api/whip/{host_id}")),
            ("etag", format!("\"{host_id}\"")),
        ],
        sdp,
    )
        .into_response())
}

/// `PATCH /api/whip/:id`: trickle remote ICE candidates. Rejects an ICE
/// restart (a changed `ice-ufrag`/`ice-pwd`) since renegotiation isn't
/// supported.
pub async fn patch(State(state): State<AppState>, Path(id): Path<uuid::Uuid>, body: String) -> Result<Response, RelayError> {
    let host = state.sessions.get_host_by_id(id).await.ok_or(RelayError::InvalidSession)?;
    let pc = host.peer_connection().await.ok_or(RelayError::InvalidSession)?;

    if let Some(remote) = pc.remote_description().await {
        if ice_credentials_changed(&remote.sdp, &body) {
            return Err(RelayError::IceRestartUnsupported);
        }
    }

    for candidate in body.lines().filter(|line| line.starts_with("a=candidate:")) {
        pc.add_ice_candidate(RTCIceCandidateInit {
            candidate: candidate.trim_start_matches("a=").to_string(),
            ..Default::default()
        })
        .await?;
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `DELETE /api/whip/:id`: remove the host; the owning session closes
/// itself once it becomes empty.
pub async fn delete(State(state): State<AppState>, Path(id): Path<uuid::Uuid>) -> Result<Response, RelayError> {
    let session = state.sessions.get_session_by_host_id(id).await.ok_or(RelayError::InvalidSession)?;
    // Emptiness (no viewers, no host tracks) is reaped by the session's own
    // 5s status tick rather than here, matching the documented GC latency.
    session.remove_host().await;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::trim).map(str::to_string)
}

fn sdp_attr_lines<'a>(sdp: &'a str, prefix: &str) -> Vec<&'a str> {
    sdp.lines().filter(|line| line.trim_start().starts_with(prefix)).collect()
}

/// Compare `ice-ufrag`/`ice-pwd` between the current remote description and
/// an incoming PATCH body; any difference means the client is attempting an
/// ICE restart, which this relay does not support.
fn ice_credentials_changed(current_sdp: &str, patch_body: &str) -> bool {
    let current_ufrag = sdp_attr_lines(current_sdp, "a=ice-ufrag:");
    let current_pwd = sdp_attr_lines(current_sdp, "a=ice-pwd:");
    let patch_ufrag = sdp_attr_lines(patch_body, "a=ice-ufrag:");
    let patch_pwd = sdp_attr_lines(patch_body, "a=ice-pwd:");

    (!patch_ufrag.is_empty() && patch_ufrag != current_ufrag) || (!patch_pwd.is_empty() && patch_pwd != current_pwd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_credentials_are_not_a_restart() {
        let sdp = "a=ice-ufrag:abcd\r\na=ice-pwd:1234\r\n";
        assert!(!ice_credentials_changed(sdp, "a=candidate:1 1 UDP 1 1.2.3.4 9 typ host\r\n"));
    }

    #[test]
    fn changed_ufrag_is_a_restart() {
        let sdp = "a=ice-ufrag:abcd\r\na=ice-pwd:1234\r\n";
        assert!(ice_credentials_changed(sdp, "a=ice-ufrag:zzzz\r\na=ice-pwd:1234\r\n"));
    }
}
