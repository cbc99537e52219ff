//! WHIP (ingest/host) session: the peer connection publishing a stream's
//! audio/video, its per-RID track bookkeeping, and the keyframe-request
//! (PLI) aggregator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::media::{self, sdp::prioritized_streaming_layer, AudioPacket, BitrateWindow, CodecKind, VideoPacket};
use crate::session::whep::{PliSink, WhepSession};

/// Default RID assumed when the remote encoding doesn't advertise one
/// (single, non-simulcast track).
const DEFAULT_RID: &str = "";

/// Per-RID bookkeeping for an inbound audio encoding.
pub struct AudioTrack {
    pub rid: String,
    pub priority: AtomicI64,
    pub packets_received: AtomicU64,
}

/// Per-RID bookkeeping for an inbound video encoding.
pub struct VideoTrack {
    pub rid: String,
    pub priority: AtomicI64,
    pub bitrate: AtomicU64,
    pub packets_received: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub media_ssrc: AtomicU32,
    pub last_keyframe: AtomicBool,
}

/// A live ingest session for one stream key.
pub struct WhipSession {
    pub host_id: uuid::Uuid,
    pub stream_key: String,
    pc: RwLock<Option<Arc<RTCPeerConnection>>>,

    audio_tracks: RwLock<HashMap<String, Arc<AudioTrack>>>,
    video_tracks: RwLock<HashMap<String, Arc<VideoTrack>>>,

    /// Lock-free snapshot of viewers, rebuilt on every add/remove so the
    /// per-packet fan-out path never takes a lock.
    viewers: ArcSwap<HashMap<uuid::Uuid, Arc<WhepSession>>>,

    closed: AtomicBool,
    on_closed: Arc<dyn Fn(uuid::Uuid) + Send + Sync>,
}

impl WhipSession {
    #[must_use]
    pub fn new(
        host_id: uuid::Uuid,
        stream_key: String,
        on_closed: Arc<dyn Fn(uuid::Uuid) + Send + Sync>,
    ) -> Self {
        Self {
            host_id,
            stream_key,
            pc: RwLock::new(None),
            audio_tracks: RwLock::new(HashMap::new()),
            video_tracks: RwLock::new(HashMap::new()),
            viewers: ArcSwap::from_pointee(HashMap::new()),
            closed: AtomicBool::new(false),
            on_closed,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Attach the negotiated peer connection, closing any previous one.
    /// Track-level on-track dispatch is handled by the caller (which owns
    /// the `Arc<WhipSession>` needed to spawn the writer loops).
    pub async fn set_peer_connection(&self, pc: Arc<RTCPeerConnection>) {
        let previous = self.pc.write().await.replace(pc);
        if let Some(previous) = previous {
            if let Err(err) = previous.close().await {
                debug!(host = %self.host_id, error = %err, "error closing replaced host peer connection");
            }
        }
    }

    /// The current peer connection, if one has been attached yet. Used by
    /// the WHIP PATCH handler to trickle remote ICE candidates and to read
    /// back the current remote description for the ICE-restart check.
    #[must_use]
    pub async fn peer_connection(&self) -> Option<Arc<RTCPeerConnection>> {
        self.pc.read().await.clone()
    }

    /// Dispatch an inbound remote track to the audio or video writer loop by
    /// MIME prefix, mirroring the reference relay's on-track handler.
    pub fn handle_track(self: &Arc<Self>, track: Arc<TrackRemote>) {
        let codec = CodecKind::from_mime_type(&track.codec().capability.mime_type);
        if codec.is_audio() {
            self.clone().spawn_audio_writer(track);
        } else {
            self.clone().spawn_video_writer(track);
        }
    }

    fn resolve_rid(track: &TrackRemote) -> String {
        let rid = track.rid();
        if rid.is_empty() {
            DEFAULT_RID.to_string()
        } else {
            rid.to_string()
        }
    }

    async fn add_audio_track(&self, rid: &str, sdp: &str) -> Arc<AudioTrack> {
        let mut tracks = self.audio_tracks.write().await;
        if let Some(existing) = tracks.get(rid) {
            return existing.clone();
        }
        let priority = prioritized_streaming_layer(sdp, rid);
        let track = Arc::new(AudioTrack {
            rid: rid.to_string(),
            priority: AtomicI64::new(i64::from(priority)),
            packets_received: AtomicU64::new(0),
        });
        tracks.insert(rid.to_string(), track.clone());
        track
    }

    async fn add_video_track(&self, rid: &str, sdp: &str) -> Arc<VideoTrack> {
        let mut tracks = self.video_tracks.write().await;
        if let Some(existing) = tracks.get(rid) {
            return existing.clone();
        }
        let priority = prioritized_streaming_layer(sdp, rid);
        let track = Arc::new(VideoTrack {
            rid: rid.to_string(),
            priority: AtomicI64::new(i64::from(priority)),
            bitrate: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            media_ssrc: AtomicU32::new(0),
            last_keyframe: AtomicBool::new(false),
        });
        tracks.insert(rid.to_string(), track.clone());
        track
    }

    /// Highest-priority (numerically smallest) video RID currently known,
    /// used to seed a new viewer's default layer.
    pub async fn best_video_layer(&self) -> (String, i32) {
        let tracks = self.video_tracks.read().await;
        tracks
            .values()
            .map(|t| (t.rid.clone(), t.priority.load(Ordering::Relaxed) as i32))
            .min_by_key(|(_, p)| *p)
            .unwrap_or_else(|| (DEFAULT_RID.to_string(), media::sdp::DEFAULT_PRIORITY))
    }

    pub async fn best_audio_layer(&self) -> (String, i32) {
        let tracks = self.audio_tracks.read().await;
        tracks
            .values()
            .map(|t| (t.rid.clone(), t.priority.load(Ordering::Relaxed) as i32))
            .min_by_key(|(_, p)| *p)
            .unwrap_or_else(|| (DEFAULT_RID.to_string(), media::sdp::DEFAULT_PRIORITY))
    }

    /// All known video RIDs, for the `layers` status event.
    pub async fn video_rids(&self) -> Vec<String> {
        self.video_tracks.read().await.keys().cloned().collect()
    }

    /// All known audio RIDs, for the `layers` status event.
    pub async fn audio_rids(&self) -> Vec<String> {
        self.audio_tracks.read().await.keys().cloned().collect()
    }

    pub async fn video_priority(&self, rid: &str) -> i32 {
        self.video_tracks
            .read()
            .await
            .get(rid)
            .map_or(media::sdp::DEFAULT_PRIORITY, |t| t.priority.load(Ordering::Relaxed) as i32)
    }

    /// Whether this host holds any live tracks, used by the owning stream
    /// session to decide emptiness: a host with no tracks doesn't keep the
    /// session alive on its own.
    pub async fn has_tracks(&self) -> bool {
        !self.audio_tracks.read().await.is_empty() || !self.video_tracks.read().await.is_empty()
    }

    pub fn publish_viewers(&self, viewers: HashMap<uuid::Uuid, Arc<WhepSession>>) {
        self.viewers.store(Arc::new(viewers));
    }

    #[must_use]
    pub fn viewers_snapshot(&self) -> Arc<HashMap<uuid::Uuid, Arc<WhepSession>>> {
        self.viewers.load_full()
    }

    /// Build one `PictureLossIndication` per video track with a non-zero
    /// SSRC and write them as a single RTCP batch. No-op without a peer
    /// connection or without any SSRC'd video track yet.
    pub async fn send_pli(&self) {
        let Some(pc) = self.pc.read().await.clone() else {
            return;
        };

        let tracks = self.video_tracks.read().await;
        let packets: Vec<Box<dyn webrtc::rtcp::packet::Packet + Send + Sync>> = tracks
            .values()
            .map(|t| t.media_ssrc.load(Ordering::Relaxed))
            .filter(|&ssrc| ssrc != 0)
            .map(|ssrc| {
                Box::new(PictureLossIndication { sender_ssrc: 0, media_ssrc: ssrc })
                    as Box<dyn webrtc::rtcp::packet::Packet + Send + Sync>
            })
            .collect();
        drop(tracks);

        if packets.is_empty() {
            return;
        }

        if let Err(err) = pc.write_rtcp(&packets).await {
            debug!(host = %self.host_id, error = %err, "failed to send PLI upstream");
        }
    }

    fn spawn_audio_writer(self: Arc<Self>, track: Arc<TrackRemote>) {
        tokio::spawn(async move {
            let rid = Self::resolve_rid(&track);
            let sdp = current_remote_sdp(&self.pc).await;
            let audio_track = self.add_audio_track(&rid, &sdp).await;
            let codec = CodecKind::from_mime_type(&track.codec().capability.mime_type);

            let mut last_timestamp: Option<i64> = None;
            let mut buf = vec![0u8; 1500];

            loop {
                let (packet, _attrs) = match track.read(&mut buf).await {
                    Ok(pair) => pair,
                    Err(err) => {
                        debug!(host = %self.host_id, rid = %rid, error = %err, "audio track read ended");
                        break;
                    }
                };

                audio_track.packets_received.fetch_add(1, Ordering::Relaxed);

                let time_diff = match last_timestamp {
                    Some(prev) => media::wrapping_diff(i64::from(packet.header.timestamp), prev, 1i64 << 32),
                    None => 0,
                };
                last_timestamp = Some(i64::from(packet.header.timestamp));

                let snapshot = self.viewers_snapshot();
                for viewer in snapshot.values() {
                    if viewer.audio_layer().await == rid {
                        viewer
                            .send_audio_packet(AudioPacket {
                                layer: rid.clone(),
                                packet: packet.clone(),
                                codec,
                                time_diff,
                            })
                            .await;
                    }
                }
            }

            self.remove_track_and_maybe_close().await;
        });
    }

    fn spawn_video_writer(self: Arc<Self>, track: Arc<TrackRemote>) {
        tokio::spawn(async move {
            let rid = Self::resolve_rid(&track);
            let sdp = current_remote_sdp(&self.pc).await;
            let video_track = self.add_video_track(&rid, &sdp).await;
            let codec = CodecKind::from_mime_type(&track.codec().capability.mime_type);

            let mut last_timestamp: Option<i64> = None;
            let mut last_sequence: Option<i64> = None;
            let mut bitrate_window = BitrateWindow::new();
            let mut buf = vec![0u8; 1500];

            loop {
                let (packet, _attrs) = match track.read(&mut buf).await {
                    Ok(pair) => pair,
                    Err(err) => {
                        debug!(host = %self.host_id, rid = %rid, error = %err, "video track read ended");
                        break;
                    }
                };

                if packet.payload.is_empty() {
                    // A read that hands back nothing is a spurious wake, not EOF.
                    continue;
                }

                video_track.packets_received.fetch_add(1, Ordering::Relaxed);
                video_track.media_ssrc.store(packet.header.ssrc, Ordering::Relaxed);

                if let Some(rate) = bitrate_window.add_bytes(packet.payload.len() as u64) {
                    video_track.bitrate.store(rate, Ordering::Relaxed);
                }

                let is_keyframe = crate::media::keyframe::is_keyframe(codec, &packet.payload);
                video_track.last_keyframe.store(is_keyframe, Ordering::Relaxed);

                let time_diff = match last_timestamp {
                    Some(prev) => media::wrapping_diff(i64::from(packet.header.timestamp), prev, 1i64 << 32),
                    None => 0,
                };
                last_timestamp = Some(i64::from(packet.header.timestamp));

                let sequence_diff = match last_sequence {
                    Some(prev) => media::wrapping_diff(i64::from(packet.header.sequence_number), prev, 1i64 << 16),
                    None => 0,
                };
                last_sequence = Some(i64::from(packet.header.sequence_number));

                let snapshot = self.viewers_snapshot();
                for viewer in snapshot.values() {
                    if viewer.video_layer().await == rid {
                        viewer
                            .send_video_packet(VideoPacket {
                                layer: rid.clone(),
                                packet: packet.clone(),
                                codec,
                                is_keyframe,
                                time_diff,
                                sequence_diff: sequence_diff as i32,
                            })
                            .await;
                    }
                }
            }

            self.remove_track_and_maybe_close().await;
        });
    }

    async fn remove_track_and_maybe_close(self: &Arc<Self>) {
        if !self.has_tracks().await {
            info!(host = %self.host_id, stream_key = %self.stream_key, "host has no remaining tracks");
        }
    }

    /// Fan-out tear-down for the peer-connection's ICE/connection-state
    /// callbacks: any terminal state runs the close-once latch.
    pub async fn notify_closed(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(pc) = self.pc.write().await.take() {
            if let Err(err) = pc.close().await {
                debug!(host = %self.host_id, error = %err, "error closing host peer connection");
            }
        }
        (self.on_closed)(self.host_id);
    }
}

/// Binds a viewer's PLI requests back to its host without the host holding
/// a strong reference to the viewer (the viewer map already holds the only
/// strong references the other way, via the snapshot).
pub struct HostPliSink(pub std::sync::Weak<WhipSession>);

impl PliSink for HostPliSink {
    fn request_pli(&self) {
        // RTCP writes are async; the trait is not, so hand off to a task.
        // This mirrors the reference relay's fire-and-forget PLI dispatch.
        if let Some(host) = self.0.upgrade() {
            tokio::spawn(async move { host.send_pli().await });
        }
    }
}

async fn current_remote_sdp(pc: &RwLock<Option<Arc<RTCPeerConnection>>>) -> String {
    let Some(pc) = pc.read().await.clone() else {
        return String::new();
    };
    pc.remote_description().await.map(|d| d.sdp).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rid_is_empty_string() {
        assert_eq!(DEFAULT_RID, "");
    }
}
