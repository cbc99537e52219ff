//! `MultiCodecTrack`: a single-SSRC outbound track that can switch payload
//! type across a codec change without renegotiating SDP.
//!
//! The host's encoder can change codec mid-stream (e.g. a simulcast layer
//! drop, or a browser falling back from AV1 to VP8). Ordinary
//! `TrackLocalStaticRTP` binds one fixed payload type at negotiation time, so
//! a mid-stream codec change would require a fresh offer/answer. This track
//! instead remembers every payload type the viewer's SDP answer negotiated
//! for each codec we might forward, and rewrites `Packet::header.payload_type`
//! on the fly when the forwarded codec changes.

use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;
use webrtc::rtp;
use webrtc::rtp_transceiver::rtp_codec::{
    codec_parameters_fuzzy_search, CodecMatch, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::{PayloadType, RTCPFeedback, SSRC};
use webrtc::track::track_local::{TrackLocal, TrackLocalContext, TrackLocalWriter};
use webrtc::Error as WebrtcError;

use super::codec::CodecKind;

const NO_PAYLOAD_TYPE: PayloadType = 0;

/// One negotiated sender for this track: which SSRC and write stream to push
/// packets to. A track is normally bound to exactly one sender, but the
/// trait allows several (mirrors `TrackLocalStaticRTP`).
struct TrackBinding {
    ssrc: SSRC,
    write_stream: Arc<dyn TrackLocalWriter + Send + Sync>,
}

/// Per-codec payload types negotiated for this track, keyed by the codec
/// tags the relay actually forwards.
#[derive(Default)]
struct NegotiatedPayloadTypes {
    h264: PayloadType,
    h265: PayloadType,
    vp8: PayloadType,
    vp9: PayloadType,
    av1: PayloadType,
    opus: PayloadType,
}

impl NegotiatedPayloadTypes {
    fn get(&self, codec: CodecKind) -> PayloadType {
        match codec {
            CodecKind::H264 => self.h264,
            CodecKind::H265 => self.h265,
            CodecKind::Vp8 => self.vp8,
            CodecKind::Vp9 => self.vp9,
            CodecKind::Av1 => self.av1,
            CodecKind::Opus => self.opus,
            CodecKind::Unknown => NO_PAYLOAD_TYPE,
        }
    }

    fn set(&mut self, codec: CodecKind, pt: PayloadType) {
        match codec {
            CodecKind::H264 => self.h264 = pt,
            CodecKind::H265 => self.h265 = pt,
            CodecKind::Vp8 => self.vp8 = pt,
            CodecKind::Vp9 => self.vp9 = pt,
            CodecKind::Av1 => self.av1 = pt,
            CodecKind::Opus => self.opus = pt,
            CodecKind::Unknown => {}
        }
    }
}

/// Outbound track that forwards RTP under whichever codec the host is
/// currently sending, rewriting the payload type to match what this
/// viewer's SDP answer negotiated for that codec.
pub struct MultiCodecTrack {
    id: String,
    stream_id: String,
    kind: RTPCodecType,
    rtcp_feedback: Vec<RTCPFeedback>,

    negotiated: Mutex<NegotiatedPayloadTypes>,
    current_payload_type: AtomicU8,
    current_codec: Mutex<CodecKind>,
    bindings: Mutex<Vec<TrackBinding>>,

    error_count: AtomicU8,
}

impl MultiCodecTrack {
    #[must_use]
    pub fn new(id: String, stream_id: String, kind: RTPCodecType, rtcp_feedback: Vec<RTCPFeedback>) -> Self {
        Self {
            id,
            stream_id,
            kind,
            rtcp_feedback,
            negotiated: Mutex::new(NegotiatedPayloadTypes::default()),
            current_payload_type: AtomicU8::new(NO_PAYLOAD_TYPE),
            current_codec: Mutex::new(CodecKind::Unknown),
            bindings: Mutex::new(Vec::new()),
            error_count: AtomicU8::new(0),
        }
    }

    /// Write an RTP packet that the host forwarded under `codec`, switching
    /// this track's active payload type first if the codec changed since the
    /// last write. Errors are logged (and counted) rather than surfaced on
    /// every packet: one dropped write shouldn't tear down the whole stream,
    /// but a sender stuck failing deserves a log line every so often.
    pub async fn write_rtp(&self, packet: &rtp::packet::Packet, codec: CodecKind) -> webrtc::error::Result<usize> {
        {
            let mut current = self.current_codec.lock().await;
            if *current != codec {
                let pt = self.negotiated.lock().await.get(codec);
                if pt != NO_PAYLOAD_TYPE {
                    self.current_payload_type.store(pt, Ordering::Relaxed);
                    *current = codec;
                }
            }
        }

        let payload_type = self.current_payload_type.load(Ordering::Relaxed);
        if payload_type == NO_PAYLOAD_TYPE {
            return Ok(0);
        }

        let mut packet = packet.clone();
        packet.header.payload_type = payload_type;

        let bindings = self.bindings.lock().await;
        let mut n = 0;
        let mut last_err = None;
        for binding in bindings.iter() {
            packet.header.ssrc = binding.ssrc;
            match binding.write_stream.write_rtp(&packet).await {
                Ok(written) => n = written,
                Err(err) => last_err = Some(err),
            }
        }
        drop(bindings);

        if let Some(err) = last_err {
            let count = self.error_count.fetch_add(1, Ordering::Relaxed);
            if count % 50 == 0 {
                warn!(track_id = %self.id, error = %err, count, "dropped RTP write on multi-codec track");
            }
            return Err(err);
        }

        Ok(n)
    }
}

#[async_trait::async_trait]
impl TrackLocal for MultiCodecTrack {
    async fn bind(&self, t: &TrackLocalContext) -> webrtc::error::Result<RTCRtpCodecParameters> {
        let mut negotiated = self.negotiated.lock().await;
        let mut matched = None;

        for candidate in [
            CodecKind::Opus,
            CodecKind::H264,
            CodecKind::H265,
            CodecKind::Vp8,
            CodecKind::Vp9,
            CodecKind::Av1,
        ] {
            let capability = candidate.capability(self.rtcp_feedback.clone());
            let wanted = RTCRtpCodecParameters {
                capability,
                ..Default::default()
            };
            let (codec, match_type) = codec_parameters_fuzzy_search(wanted, t.codec_parameters());
            if match_type != CodecMatch::None {
                negotiated.set(candidate, codec.payload_type);
                if matched.is_none() {
                    matched = Some(codec);
                }
            }
        }

        drop(negotiated);

        let Some(codec) = matched else {
            return Err(WebrtcError::ErrUnsupportedCodec);
        };

        self.bindings.lock().await.push(TrackBinding {
            ssrc: t.ssrc(),
            write_stream: t
                .write_stream()
                .ok_or(WebrtcError::ErrUnbindFailed)?,
        });

        Ok(codec)
    }

    async fn unbind(&self, t: &TrackLocalContext) -> webrtc::error::Result<()> {
        let mut bindings = self.bindings.lock().await;
        let before = bindings.len();
        bindings.retain(|b| b.ssrc != t.ssrc());
        if bindings.len() == before {
            return Err(WebrtcError::ErrUnbindFailed);
        }
        Ok(())
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    fn kind(&self) -> RTPCodecType {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::rtp::header::Header;

    fn sample_packet() -> rtp::packet::Packet {
        rtp::packet::Packet {
            header: Header {
                payload_type: 0,
                sequence_number: 1,
                timestamp: 1000,
                ssrc: 0,
                ..Default::default()
            },
            payload: bytes::Bytes::from_static(b"x"),
        }
    }

    #[tokio::test]
    async fn write_with_no_negotiated_codec_is_a_silent_noop() {
        let track = MultiCodecTrack::new("v".into(), "s".into(), RTPCodecType::Video, vec![]);
        let n = track.write_rtp(&sample_packet(), CodecKind::H264).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn codec_switch_updates_active_payload_type() {
        let track = MultiCodecTrack::new("v".into(), "s".into(), RTPCodecType::Video, vec![]);
        {
            let mut negotiated = track.negotiated.lock().await;
            negotiated.set(CodecKind::H264, 96);
            negotiated.set(CodecKind::Vp8, 97);
        }

        track.write_rtp(&sample_packet(), CodecKind::H264).await.unwrap();
        assert_eq!(track.current_payload_type.load(Ordering::Relaxed), 96);
        assert_eq!(*track.current_codec.lock().await, CodecKind::H264);

        track.write_rtp(&sample_packet(), CodecKind::Vp8).await.unwrap();
        assert_eq!(track.current_payload_type.load(Ordering::Relaxed), 97);
        assert_eq!(*track.current_codec.lock().await, CodecKind::Vp8);
    }

    #[tokio::test]
    async fn unknown_codec_keeps_previous_payload_type() {
        let track = MultiCodecTrack::new("a".into(), "s".into(), RTPCodecType::Audio, vec![]);
        track.negotiated.lock().await.set(CodecKind::Opus, 111);

        track.write_rtp(&sample_packet(), CodecKind::Opus).await.unwrap();
        assert_eq!(track.current_payload_type.load(Ordering::Relaxed), 111);

        // A codec we never negotiated a payload type for shouldn't clobber
        // the last-known-good payload type.
        track.write_rtp(&sample_packet(), CodecKind::Av1).await.unwrap();
        assert_eq!(track.current_payload_type.load(Ordering::Relaxed), 111);
    }
}
