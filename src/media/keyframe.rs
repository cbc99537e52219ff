//! Keyframe detection on ingest, used to gate a freshly-subscribed viewer's
//! first video packet and to decide whether a host's PLI response actually
//! recovered the stream.
//!
//! Only H.264 needs payload inspection: VP8/VP9/AV1 packets carry a
//! keyframe flag the depacketizer already exposes elsewhere, and for any
//! codec we don't recognize we simply treat every packet as eligible rather
//! than stall the viewer waiting for a signal we can't compute.

use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::packetizer::Depacketizer;

use super::codec::CodecKind;

/// NALU types that start a decodable picture: IDR slice, SPS, PPS.
const KEYFRAME_NALU_TYPES: [u8; 3] = [5, 7, 8];
const NALU_TYPE_BITMASK: u8 = 0x1f;

/// Does `payload` (the RTP payload of a single packet) carry a keyframe for
/// `codec`? Only H.264 is inspected; every other codec is reported as a
/// keyframe so the caller doesn't gate forwarding on a signal we don't have.
#[must_use]
pub fn is_keyframe(codec: CodecKind, payload: &[u8]) -> bool {
    if codec != CodecKind::H264 {
        return true;
    }

    let mut depacketizer = H264Packet::default();
    let Ok(nalu) = depacketizer.depacketize(&bytes::Bytes::copy_from_slice(payload)) else {
        return false;
    };

    // depacketize() prefixes the NALU with the 4-byte Annex-B start code.
    if nalu.len() < 5 {
        return false;
    }

    KEYFRAME_NALU_TYPES.contains(&(nalu[4] & NALU_TYPE_BITMASK))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_h264_codecs_are_always_keyframe_eligible() {
        assert!(is_keyframe(CodecKind::Vp8, &[]));
        assert!(is_keyframe(CodecKind::Opus, &[1, 2, 3]));
    }

    #[test]
    fn single_nalu_idr_slice_is_a_keyframe() {
        // Single NALU (type 1-23 passthrough): header byte with type=5 (IDR).
        let payload = [0x65, 0xAA, 0xBB, 0xCC];
        assert!(is_keyframe(CodecKind::H264, &payload));
    }

    #[test]
    fn single_nalu_non_idr_slice_is_not_a_keyframe() {
        // type=1: non-IDR slice.
        let payload = [0x61, 0xAA, 0xBB, 0xCC];
        assert!(!is_keyframe(CodecKind::H264, &payload));
    }

    #[test]
    fn truncated_payload_is_not_a_keyframe() {
        assert!(!is_keyframe(CodecKind::H264, &[0x65]));
    }
}
