//! Media-plane primitives shared by the WHIP host and WHEP viewer sessions:
//! codec tagging, SDP simulcast parsing, and the multi-codec outbound track.

pub mod bitrate;
pub mod codec;
pub mod keyframe;
pub mod packet;
pub mod sdp;
pub mod track;

pub use bitrate::BitrateWindow;
pub use codec::CodecKind;
pub use packet::{AudioPacket, VideoPacket};
pub use track::MultiCodecTrack;

/// Wrap-tolerant difference used for both timestamp (32-bit) and sequence
/// number (16-bit) rewriting: a large negative delta is treated as a
/// forward wrap rather than a stream reset.
///
/// `modulus` is `2^32` for timestamps, `2^16` for sequence numbers; `current`
/// and `previous` are the raw (unwrapped) values widened to `i64`.
#[must_use]
pub fn wrapping_diff(current: i64, previous: i64, modulus: i64) -> i64 {
    let diff = current - previous;
    if diff < -(modulus / 10) {
        diff + modulus + 1
    } else {
        diff
    }
}

#[cfg(test)]
mod wrap_tests {
    use super::*;

    #[test]
    fn forward_progress_is_unchanged() {
        assert_eq!(wrapping_diff(105, 100, 1 << 32), 5);
    }

    #[test]
    fn small_negative_is_kept_as_is() {
        // Not past the -(modulus/10) threshold: a real small regression, not a wrap.
        assert_eq!(wrapping_diff(99, 100, 1 << 16), -1);
    }

    #[test]
    fn large_negative_is_treated_as_a_forward_wrap() {
        let modulus = 1i64 << 16;
        let diff = wrapping_diff(0, modulus - 1, modulus);
        assert_eq!(diff, 2);
    }

    #[test]
    fn initial_packet_has_zero_diff() {
        assert_eq!(wrapping_diff(1000, 1000, 1 << 32), 0);
    }
}
