//! Packets as they travel from a host's read loop to each subscribed
//! viewer, already carrying the rewrite deltas the viewer needs to apply.

use webrtc::rtp;

use super::codec::CodecKind;

/// One inbound audio RTP packet, tagged with the RID it arrived on.
#[derive(Clone)]
pub struct AudioPacket {
    pub layer: String,
    pub packet: rtp::packet::Packet,
    pub codec: CodecKind,
    pub time_diff: i64,
}

/// One inbound video RTP packet, tagged with the RID, codec, keyframe
/// status, and the wrap-tolerant sequence/timestamp deltas since the
/// previous packet on this RID.
#[derive(Clone)]
pub struct VideoPacket {
    pub layer: String,
    pub packet: rtp::packet::Packet,
    pub codec: CodecKind,
    pub is_keyframe: bool,
    pub time_diff: i64,
    pub sequence_diff: i32,
}
