//! WHEP (egress/viewer) session: one viewer's outbound audio/video tracks,
//! RTP rewriting, layer selection, and keyframe gating.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use webrtc::peer_connection::RTCPeerConnection;

use crate::media::{AudioPacket, BitrateWindow, MultiCodecTrack, VideoPacket};

/// Something a viewer can ask to request a fresh keyframe from the host.
/// Implemented by [`super::whip::WhipSession`]; kept as a trait so the
/// viewer doesn't need a concrete dependency on the host type.
pub trait PliSink: Send + Sync {
    fn request_pli(&self);
}

/// Callback invoked exactly once when a viewer closes, so the owning
/// stream session can drop it from the viewer map and refresh the host's
/// snapshot.
pub type OnClose = Arc<dyn Fn(uuid::Uuid) + Send + Sync>;

const INITIAL_TIMESTAMP: u32 = 5000;

struct VideoState {
    layer: String,
    /// An explicit `setVideoLayer` call wins over later automatic
    /// (priority-based) layer selection until cleared.
    explicit: bool,
    sequence_number: u16,
    timestamp: u32,
    bytes_written: u64,
    packets_written: u64,
    bitrate_window: BitrateWindow,
}

struct AudioState {
    layer: String,
    sequence_number: u16,
    timestamp: u32,
    packets_written: u64,
}

/// One viewer's egress session.
pub struct WhepSession {
    pub viewer_id: uuid::Uuid,
    pc: Arc<RTCPeerConnection>,

    audio_track: RwLock<Option<Arc<MultiCodecTrack>>>,
    video_track: RwLock<Option<Arc<MultiCodecTrack>>>,

    audio: RwLock<AudioState>,
    video: RwLock<VideoState>,

    is_waiting_for_keyframe: AtomicBool,
    is_session_closed: AtomicBool,
    video_packets_dropped: AtomicU64,
    video_bitrate: AtomicU64,
    video_timestamp_for_status: AtomicU32,

    pli_sink: Arc<dyn PliSink>,
    on_close: OnClose,
}

/// Snapshot returned by [`WhepSession::status`], mirroring the side-channel
/// status event's viewer fields.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WhepStatus {
    pub id: uuid::Uuid,
    pub audio_layer_current: String,
    pub audio_timestamp: u32,
    pub audio_packets_written: u64,
    pub audio_sequence_number: u16,
    pub video_layer_current: String,
    pub video_timestamp: u32,
    pub video_bitrate: u64,
    pub video_packets_written: u64,
    pub video_packets_dropped: u64,
    pub video_sequence_number: u16,
}

impl WhepSession {
    #[must_use]
    pub fn new(
        viewer_id: uuid::Uuid,
        pc: Arc<RTCPeerConnection>,
        audio_track: Arc<MultiCodecTrack>,
        video_track: Arc<MultiCodecTrack>,
        default_audio_layer: String,
        default_video_layer: String,
        pli_sink: Arc<dyn PliSink>,
        on_close: OnClose,
    ) -> Self {
        Self {
            viewer_id,
            pc,
            audio_track: RwLock::new(Some(audio_track)),
            video_track: RwLock::new(Some(video_track)),
            audio: RwLock::new(AudioState {
                layer: default_audio_layer,
                sequence_number: 0,
                timestamp: INITIAL_TIMESTAMP,
                packets_written: 0,
            }),
            video: RwLock::new(VideoState {
                layer: default_video_layer,
                explicit: false,
                sequence_number: 0,
                timestamp: INITIAL_TIMESTAMP,
                bytes_written: 0,
                packets_written: 0,
                bitrate_window: BitrateWindow::new(),
            }),
            is_waiting_for_keyframe: AtomicBool::new(true),
            is_session_closed: AtomicBool::new(false),
            video_packets_dropped: AtomicU64::new(0),
            video_bitrate: AtomicU64::new(0),
            video_timestamp_for_status: AtomicU32::new(INITIAL_TIMESTAMP),
            pli_sink,
            on_close,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.is_session_closed.load(Ordering::Acquire)
    }

    /// The viewer's peer connection, used by the WHEP PATCH handler to
    /// trickle remote ICE candidates.
    #[must_use]
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        self.pc.clone()
    }

    #[must_use]
    pub async fn audio_layer(&self) -> String {
        self.audio.read().await.layer.clone()
    }

    #[must_use]
    pub async fn video_layer(&self) -> String {
        self.video.read().await.layer.clone()
    }

    /// Explicit layer change: stores the RID, re-arms the keyframe gate, and
    /// issues an upstream PLI. An explicit call always wins over later
    /// automatic (priority-based) selection until the viewer disconnects.
    pub async fn set_video_layer(&self, rid: String) {
        let mut video = self.video.write().await;
        video.layer = rid;
        video.explicit = true;
        drop(video);
        self.is_waiting_for_keyframe.store(true, Ordering::Release);
        self.send_pli();
    }

    pub async fn set_audio_layer(&self, rid: String) {
        self.audio.write().await.layer = rid;
        self.send_pli();
    }

    /// Automatic layer default: adopt `(default_rid, default_priority)` if no
    /// layer is chosen yet, or if it's a strictly better (lower) priority
    /// than the one currently in effect and the viewer hasn't pinned a
    /// layer explicitly. `current_priority` is looked up by the caller
    /// (typically the host) from its track priority map.
    pub async fn apply_default_video_layer_if_unset(
        &self,
        default_rid: &str,
        default_priority: i32,
        current_priority: i32,
    ) {
        let mut video = self.video.write().await;
        if video.explicit {
            return;
        }
        if video.layer.is_empty() || default_priority < current_priority {
            video.layer = default_rid.to_string();
            drop(video);
            self.is_waiting_for_keyframe.store(true, Ordering::Release);
        }
    }

    pub async fn send_audio_packet(&self, pkt: AudioPacket) {
        if self.is_closed() {
            return;
        }

        let (packet, track) = {
            let mut audio = self.audio.write().await;
            if audio.layer != pkt.layer {
                return;
            }
            let Some(track) = self.audio_track.read().await.clone() else {
                return;
            };
            audio.packets_written += 1;
            audio.timestamp = audio.timestamp.wrapping_add(pkt.time_diff.rem_euclid(1i64 << 32) as u32);
            audio.sequence_number = pkt.packet.header.sequence_number;

            let mut packet = pkt.packet;
            packet.header.timestamp = audio.timestamp;
            (packet, track)
        };

        if let Err(err) = track.write_rtp(&packet, pkt.codec).await {
            if is_closed_pipe(&err) {
                self.close().await;
            } else {
                warn!(viewer = %self.viewer_id, error = %err, "audio write failed");
            }
        }
    }

    pub async fn send_video_packet(&self, pkt: VideoPacket) {
        if self.is_closed() {
            return;
        }

        if self.is_waiting_for_keyframe.load(Ordering::Acquire) {
            if !pkt.is_keyframe {
                self.send_pli();
                return;
            }
            self.is_waiting_for_keyframe.store(false, Ordering::Release);
        }

        let (packet, track) = {
            let mut video = self.video.write().await;
            if video.layer != pkt.layer {
                return;
            }

            video.bytes_written += pkt.packet.payload.len() as u64;
            video.packets_written += 1;
            if let Some(rate) = video.bitrate_window.add_bytes(pkt.packet.payload.len() as u64) {
                self.video_bitrate.store(rate, Ordering::Relaxed);
            }

            video.sequence_number = video
                .sequence_number
                .wrapping_add(pkt.sequence_diff.rem_euclid(1 << 16) as u16);
            video.timestamp = video.timestamp.wrapping_add(pkt.time_diff.rem_euclid(1i64 << 32) as u32);
            self.video_timestamp_for_status.store(video.timestamp, Ordering::Relaxed);

            let Some(track) = self.video_track.read().await.clone() else {
                return;
            };

            let mut packet = pkt.packet;
            packet.header.sequence_number = video.sequence_number;
            packet.header.timestamp = video.timestamp;
            (packet, track)
        };

        if let Err(err) = track.write_rtp(&packet, pkt.codec).await {
            self.video_packets_dropped.fetch_add(1, Ordering::Relaxed);
            if is_closed_pipe(&err) {
                self.close().await;
            } else {
                warn!(viewer = %self.viewer_id, error = %err, "video write failed");
            }
        }
    }

    pub fn send_pli(&self) {
        if !self.is_closed() {
            self.pli_sink.request_pli();
        }
    }

    /// Point-in-time status snapshot for the side-channel status event.
    pub async fn status(&self) -> WhepStatus {
        let audio = self.audio.read().await;
        let video = self.video.read().await;
        WhepStatus {
            id: self.viewer_id,
            audio_layer_current: audio.layer.clone(),
            audio_timestamp: audio.timestamp,
            audio_packets_written: audio.packets_written,
            audio_sequence_number: audio.sequence_number,
            video_layer_current: video.layer.clone(),
            video_timestamp: video.timestamp,
            video_bitrate: self.video_bitrate.load(Ordering::Relaxed),
            video_packets_written: video.packets_written,
            video_packets_dropped: self.video_packets_dropped.load(Ordering::Relaxed),
            video_sequence_number: video.sequence_number,
        }
    }

    /// Close-once: mark closed, gracefully close the peer connection, drop
    /// both track handles, and invoke `on_close` exactly once.
    pub async fn close(&self) {
        if self.is_session_closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(err) = self.pc.close().await {
            debug!(viewer = %self.viewer_id, error = %err, "error closing viewer peer connection");
        }

        *self.audio_track.write().await = None;
        *self.video_track.write().await = None;

        (self.on_close)(self.viewer_id);
    }
}

fn is_closed_pipe(err: &webrtc::Error) -> bool {
    matches!(err, webrtc::Error::ErrClosedPipe)
}

#[cfg(test)]
mod tests {
    #[test]
    fn wrap_tolerant_sequence_advance_rolls_over_at_16_bits() {
        let mut seq: u16 = 65534;
        let diff = crate::media::wrapping_diff(1, 65534, 1 << 16);
        seq = seq.wrapping_add(diff.rem_euclid(1 << 16) as u16);
        assert_eq!(seq, 0);
    }

    #[test]
    fn wrap_tolerant_timestamp_advance_rolls_over_at_32_bits() {
        let mut ts: u32 = u32::MAX - 1;
        let diff = crate::media::wrapping_diff(1, i64::from(u32::MAX) - 1, 1i64 << 32);
        ts = ts.wrapping_add(diff.rem_euclid(1i64 << 32) as u32);
        assert_eq!(ts, 0);
    }
}
