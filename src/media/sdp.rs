//! Simulcast layer-priority parsing.
//!
//! The remote SDP advertises simulcast ordering as `a=simulcast:send L1;L2;...`
//! with priority 1 = best, left-to-right. We scan the raw SDP text rather than
//! building a full session-description parser, since this is the only
//! attribute the relay needs out of the offer.

/// Default priority assigned to a RID that is absent from the `simulcast`
/// attribute, or when no such attribute is present at all.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Parse the `a=simulcast:send ...` attribute out of an SDP body and return
/// the priority (1 = best) for `layer`, or [`DEFAULT_PRIORITY`] if the layer
/// isn't listed or the attribute is absent/unparseable.
///
/// Accepts `;`-separated RIDs (the current wire format) and is liberal with
/// surrounding whitespace; RID comparison is case-insensitive.
#[must_use]
pub fn prioritized_streaming_layer(sdp: &str, layer: &str) -> i32 {
    for line in sdp.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("a=simulcast:") else {
            continue;
        };
        let rest = rest.trim();
        let Some(layers) = rest.strip_prefix("send") else {
            continue;
        };

        let mut priority = 1;
        for rid in layers.trim().split(';') {
            let rid = rid.trim();
            if rid.is_empty() {
                continue;
            }
            if rid.eq_ignore_ascii_case(layer) {
                return priority;
            }
            priority += 1;
        }
    }

    DEFAULT_PRIORITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_priority_from_left_to_right() {
        let sdp = "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=simulcast:send f;h;q\r\n";
        assert_eq!(prioritized_streaming_layer(sdp, "f"), 1);
        assert_eq!(prioritized_streaming_layer(sdp, "h"), 2);
        assert_eq!(prioritized_streaming_layer(sdp, "q"), 3);
    }

    #[test]
    fn unknown_layer_falls_back_to_default() {
        let sdp = "a=simulcast:send f;h;q\r\n";
        assert_eq!(prioritized_streaming_layer(sdp, "nonexistent"), DEFAULT_PRIORITY);
    }

    #[test]
    fn missing_attribute_falls_back_to_default() {
        let sdp = "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";
        assert_eq!(prioritized_streaming_layer(sdp, "f"), DEFAULT_PRIORITY);
    }

    #[test]
    fn is_case_insensitive_and_whitespace_tolerant() {
        let sdp = "a=simulcast:send   F ; H ; Q\r\n";
        assert_eq!(prioritized_streaming_layer(sdp, "f"), 1);
        assert_eq!(prioritized_streaming_layer(sdp, "q"), 3);
    }
}
