//! WHEP (egress) handlers: `POST /api/whep`, `PATCH /api/whep/:id`,
//! `DELETE /api/whep/:id`. Unauthenticated on the public path, symmetric to
//! the WHIP ingest flow otherwise.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;

use crate::chat::datachannel;
use crate::error::RelayError;
use crate::http::AppState;
use crate::media::MultiCodecTrack;
use crate::session::whip::HostPliSink;
use crate::session::whep::WhepSession;

#[derive(Deserialize)]
pub struct StreamKeyQuery {
    #[serde(rename = "key")]
    stream_key: String,
}

/// `POST /api/whep?key=<streamKey>`: join an existing stream as a viewer.
pub async fn create(
    State(state): State<AppState>,
    Query(query): Query<StreamKeyQuery>,
    body: String,
) -> Result<Response, RelayError> {
    let stream_session = state
        .sessions
        .get_by_stream_key(&query.stream_key)
        .await
        .ok_or(RelayError::NoActiveStream)?;
    let host = stream_session.host().await.ok_or(RelayError::NoActiveStream)?;

    let offer = RTCSessionDescription::offer(body).map_err(|err| RelayError::InvalidOffer(err.to_string()))?;

    let pc = Arc::new(state.api.new_peer_connection(crate::rtc::rtc_configuration(&state.config.ice)).await?);

    pc.add_transceiver_from_kind(
        RTPCodecType::Audio,
        Some(RTCRtpTransceiverInit { direction: RTCRtpTransceiverDirection::Sendonly, send_encodings: vec![] }),
    )
    .await?;
    pc.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit { direction: RTCRtpTransceiverDirection::Sendonly, send_encodings: vec![] }),
    )
    .await?;

    let viewer_id = uuid::Uuid::new_v4();

    let audio_track = Arc::new(MultiCodecTrack::new(
        format!("audio-{viewer_id}"),
        viewer_id.to_string(),
        RTPCodecType::Audio,
        vec![],
    ));
    let video_track = Arc::new(MultiCodecTrack::new(
        format!("video-{viewer_id}"),
        viewer_id.to_string(),
        RTPCodecType::Video,
        crate::media::codec::CodecKind::H264.capability(vec![]).rtcp_feedback,
    ));

    pc.add_track(audio_track.clone() as Arc<dyn TrackLocal + Send + Sync>).await?;
    pc.add_track(video_track.clone() as Arc<dyn TrackLocal + Send + Sync>).await?;

    let (default_audio_rid, _) = host.best_audio_layer().await;
    let (default_video_rid, _) = host.best_video_layer().await;

    let pli_sink = Arc::new(HostPliSink(Arc::downgrade(&host)));

    let on_close_session = Arc::downgrade(&stream_session);
    let on_close: crate::session::whep::OnClose = Arc::new(move |viewer_id| {
        if let Some(session) = on_close_session.upgrade() {
            tokio::spawn(async move { session.handle_viewer_close(viewer_id).await });
        }
    });

    let whep_session = Arc::new(WhepSession::new(
        viewer_id,
        pc.clone(),
        audio_track,
        video_track,
        default_audio_rid,
        default_video_rid,
        pli_sink,
        on_close,
    ));

    {
        let whep_session = whep_session.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let whep_session = whep_session.clone();
            Box::pin(async move {
                match state {
                    RTCIceConnectionState::Connected => whep_session.send_pli(),
                    RTCIceConnectionState::Failed | RTCIceConnectionState::Closed => {
                        whep_session.close().await;
                    }
                    _ => {}
                }
            })
        }));
    }

    {
        let whep_session = whep_session.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let whep_session = whep_session.clone();
            Box::pin(async move {
                if matches!(state, RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed) {
                    whep_session.close().await;
                }
            })
        }));
    }

    {
        let stream_key = query.stream_key.clone();
        let chat = state.chat.clone();
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let stream_key = stream_key.clone();
            let chat = chat.clone();
            Box::pin(async move {
                datachannel::bind(stream_key, viewer_id, channel, chat);
            })
        }));
    }

    pc.set_remote_description(offer).await?;
    let answer = pc.create_answer(None).await?;
    let mut gathering_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await?;
    let _ = gathering_complete.recv().await;

    let sdp = pc.local_description().await.map(|d| d.sdp).unwrap_or_default();

    stream_session.add_viewer(whep_session).await?;

    tracing::info!(stream_key = %query.stream_key, %viewer_id, "whep session created");

    Ok((
        StatusCode::CREATED,
        [
            ("content-type", "application/sdp".to_string()),
            ("location", format!("/api/whep/{viewer_id}")),
            ("etag", format!("\"{viewer_id}\"")),
        ],
        sdp,
    )
        .into_response())
}

/// `PATCH /api/whep/:id`: trickle remote ICE candidates.
pub async fn patch(State(state): State<AppState>, Path(id): Path<uuid::Uuid>, body: String) -> Result<Response, RelayError> {
    let viewer = state.sessions.get_viewer_by_id(id).await.ok_or(RelayError::InvalidSession)?;
    let pc = viewer.peer_connection();

    for candidate in body.lines().filter(|line| line.starts_with("a=candidate:")) {
        pc.add_ice_candidate(RTCIceCandidateInit {
            candidate: candidate.trim_start_matches("a=").to_string(),
            ..Default::default()
        })
        .await?;
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `DELETE /api/whep/:id`: close the viewer.
pub async fn delete(State(state): State<AppState>, Path(id): Path<uuid::Uuid>) -> Result<Response, RelayError> {
    let viewer = state.sessions.get_viewer_by_id(id).await.ok_or(RelayError::InvalidSession)?;
    viewer.close().await;
    Ok(StatusCode::NO_CONTENT.into_response())
}
