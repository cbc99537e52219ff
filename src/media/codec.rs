//! Codec tagging shared between the WHIP host's track maps and the
//! WHEP viewer's multi-codec outbound track.

use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::RTCPFeedback;

/// A coarse codec tag derived from an RTP codec's MIME type. Used to decide
/// when an outbound [`super::track::MultiCodecTrack`] must switch payload
/// type, and to pick the keyframe-detection strategy on ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    H264,
    H265,
    Vp8,
    Vp9,
    Av1,
    Opus,
    Unknown,
}

impl CodecKind {
    /// Map a MIME type (`video/H264`, `audio/opus`, ...) to a [`CodecKind`].
    /// Matching is case-insensitive on the subtype, mirroring the reference
    /// implementation's `GetVideoTrackCodec`/`GetAudioTrackCodec`.
    #[must_use]
    pub fn from_mime_type(mime_type: &str) -> Self {
        let Some((kind, subtype)) = mime_type.split_once('/') else {
            return Self::Unknown;
        };
        let subtype = subtype.to_ascii_lowercase();
        match (kind.to_ascii_lowercase().as_str(), subtype.as_str()) {
            ("video", "h264") => Self::H264,
            ("video", "h265") => Self::H265,
            ("video", "vp8") => Self::Vp8,
            ("video", "vp9") => Self::Vp9,
            ("video", "av1") => Self::Av1,
            ("audio", "opus") => Self::Opus,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn is_audio(self) -> bool {
        matches!(self, Self::Opus)
    }

    #[must_use]
    pub const fn rtp_codec_type(self) -> RTPCodecType {
        if self.is_audio() {
            RTPCodecType::Audio
        } else {
            RTPCodecType::Video
        }
    }

    /// MIME type used to build an [`RTCRtpCodecCapability`] for SDP codec
    /// matching. Only `mime_type`/`clock_rate`/`channels` participate in the
    /// fuzzy match the track bind step performs; `sdp_fmtp_line` is left
    /// blank since a fuzzy match ignores it too.
    const fn mime_type(self) -> &'static str {
        match self {
            Self::H264 => "video/H264",
            Self::H265 => "video/H265",
            Self::Vp8 => "video/VP8",
            Self::Vp9 => "video/VP9",
            Self::Av1 => "video/AV1",
            Self::Opus => "audio/opus",
            Self::Unknown => "",
        }
    }

    /// Build the codec capability used when negotiating this codec on a
    /// [`super::track::MultiCodecTrack`].
    #[must_use]
    pub fn capability(self, rtcp_feedback: Vec<RTCPFeedback>) -> RTCRtpCodecCapability {
        let (clock_rate, channels) = if self.is_audio() { (48_000, 2) } else { (90_000, 0) };
        RTCRtpCodecCapability {
            mime_type: self.mime_type().to_string(),
            clock_rate,
            channels,
            sdp_fmtp_line: String::new(),
            rtcp_feedback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_mime_types() {
        assert_eq!(CodecKind::from_mime_type("video/H264"), CodecKind::H264);
        assert_eq!(CodecKind::from_mime_type("video/h264"), CodecKind::H264);
        assert_eq!(CodecKind::from_mime_type("video/VP9"), CodecKind::Vp9);
        assert_eq!(CodecKind::from_mime_type("audio/opus"), CodecKind::Opus);
    }

    #[test]
    fn unknown_mime_type_falls_back() {
        assert_eq!(CodecKind::from_mime_type("video/AV2"), CodecKind::Unknown);
        assert_eq!(CodecKind::from_mime_type("garbage"), CodecKind::Unknown);
    }

    #[test]
    fn audio_flag_matches_rtp_codec_type() {
        assert!(CodecKind::Opus.is_audio());
        assert_eq!(CodecKind::Opus.rtp_codec_type(), RTPCodecType::Audio);
        assert_eq!(CodecKind::H264.rtp_codec_type(), RTPCodecType::Video);
    }
}
