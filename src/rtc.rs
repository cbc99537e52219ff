//! Shared WebRTC plumbing: one [`webrtc::api::API`] built with the codecs the
//! relay forwards, and the `RTCConfiguration` (ICE servers) derived from
//! [`crate::config::IceConfig`]. Both the WHIP and WHEP handlers borrow this
//! instead of building their own `MediaEngine`, so codec/PT numbering stays
//! identical on ingest and egress.

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::RTCPFeedback;

use crate::config::IceConfig;

fn video_feedback() -> Vec<RTCPFeedback> {
    vec![
        RTCPFeedback { typ: "goog-remb".to_string(), parameter: String::new() },
        RTCPFeedback { typ: "ccm".to_string(), parameter: "fir".to_string() },
        RTCPFeedback { typ: "nack".to_string(), parameter: String::new() },
        RTCPFeedback { typ: "nack".to_string(), parameter: "pli".to_string() },
    ]
}

/// Build the `webrtc::api::API` used for every peer connection the relay
/// creates, ingest or egress: Opus audio plus VP9/VP8/H264 video, matching
/// the payload-type numbering [`crate::media::track::MultiCodecTrack`]
/// expects to negotiate against.
pub fn build_api() -> Result<API, webrtc::Error> {
    let mut media_engine = MediaEngine::default();

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48_000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            payload_type: 111,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: "video/VP9".to_string(),
                clock_rate: 90_000,
                channels: 0,
                sdp_fmtp_line: "profile-id=0".to_string(),
                rtcp_feedback: video_feedback(),
            },
            payload_type: 98,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90_000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: video_feedback(),
            },
            payload_type: 96,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: "video/H264".to_string(),
                clock_rate: 90_000,
                channels: 0,
                sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                    .to_string(),
                rtcp_feedback: video_feedback(),
            },
            payload_type: 102,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Translate `STUN_SERVERS`/`TURN_SERVERS` into the ICE server list every
/// new peer connection is configured with.
#[must_use]
pub fn ice_servers(ice: &IceConfig) -> Vec<RTCIceServer> {
    let mut servers = Vec::new();

    if !ice.stun_servers.is_empty() {
        servers.push(RTCIceServer { urls: ice.stun_servers.clone(), ..Default::default() });
    }

    if !ice.turn_servers.is_empty() {
        let (username, credential) = ice
            .turn_server_auth_secret
            .as_ref()
            .map(|secret| (String::new(), secret.clone()))
            .unwrap_or_default();
        servers.push(RTCIceServer {
            urls: ice.turn_servers.clone(),
            username,
            credential,
            ..Default::default()
        });
    }

    servers
}

#[must_use]
pub fn rtc_configuration(ice: &IceConfig) -> RTCConfiguration {
    RTCConfiguration { ice_servers: ice_servers(ice), ..Default::default() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_servers_configured_yields_empty_list() {
        assert!(ice_servers(&IceConfig::default()).is_empty());
    }

    #[test]
    fn stun_and_turn_both_populate_separate_entries() {
        let ice = IceConfig {
            stun_servers: vec!["stun:stun.example.com:3478".to_string()],
            turn_servers: vec!["turn:turn.example.com:3478".to_string()],
            turn_server_auth_secret: Some("secret".to_string()),
            ..Default::default()
        };
        let servers = ice_servers(&ice);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].credential, "secret");
    }
}
