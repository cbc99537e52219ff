//! One stream key's pairing of at-most-one host with many viewers: status
//! fields, the host compare-and-swap slot, viewer lifecycle, and the 5s
//! status broadcast loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::profiles::StreamProfile;
use crate::session::whep::WhepSession;
use crate::session::whip::WhipSession;

struct Status {
    motd: String,
    is_public: bool,
    stream_start: Option<chrono::DateTime<chrono::Utc>>,
    has_host: bool,
}

/// Pairs one ingest host with many viewers under a single stream key.
pub struct StreamSession {
    pub stream_key: String,
    host: RwLock<Option<Arc<WhipSession>>>,
    viewers: RwLock<HashMap<uuid::Uuid, Arc<WhepSession>>>,
    status: RwLock<Status>,
    closed: AtomicBool,
    cancel: CancellationToken,
    on_close: Arc<dyn Fn(String) + Send + Sync>,
}

impl StreamSession {
    #[must_use]
    pub fn new(stream_key: String, on_close: Arc<dyn Fn(String) + Send + Sync>) -> Arc<Self> {
        let session = Arc::new(Self {
            stream_key,
            host: RwLock::new(None),
            viewers: RwLock::new(HashMap::new()),
            status: RwLock::new(Status {
                motd: String::new(),
                is_public: false,
                stream_start: None,
                has_host: false,
            }),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            on_close,
        });
        session.clone().spawn_status_loop();
        session
    }

    pub async fn update_stream_status(&self, profile: &StreamProfile) {
        let mut status = self.status.write().await;
        status.motd = profile.motd.clone();
        status.is_public = profile.is_public;
        status.has_host = true;
    }

    #[must_use]
    pub async fn is_public(&self) -> bool {
        self.status.read().await.is_public
    }

    /// Succeed iff no live host currently exists. "Live" means the slot is
    /// occupied and its peer connection hasn't moved to a terminal ICE/
    /// connection state; callers are expected to have already checked that
    /// via the caller's own connection-state tracking (the host removes
    /// itself through `handle_host_closed` on terminal transitions, so by
    /// the time this runs the slot reflects the true liveness).
    pub async fn add_host(&self, host: Arc<WhipSession>) -> Result<(), crate::error::RelayError> {
        let mut slot = self.host.write().await;
        if slot.is_some() {
            return Err(crate::error::RelayError::HostExists);
        }
        *slot = Some(host);
        drop(slot);
        self.status.write().await.has_host = true;
        self.status.write().await.stream_start = Some(chrono::Utc::now());
        self.refresh_host_snapshot().await;
        info!(stream_key = %self.stream_key, "host attached");
        Ok(())
    }

    pub async fn remove_host(&self) {
        let removed = self.host.write().await.take();
        if let Some(host) = removed {
            host.notify_closed().await;
        }
        self.status.write().await.has_host = false;
    }

    #[must_use]
    pub async fn host(&self) -> Option<Arc<WhipSession>> {
        self.host.read().await.clone()
    }

    /// Add a viewer seeded with the host's current best audio/video layers;
    /// requires a live host. Refreshes the host's lock-free viewer
    /// snapshot afterward.
    pub async fn add_viewer(&self, viewer: Arc<WhepSession>) -> Result<(), crate::error::RelayError> {
        if self.host.read().await.is_none() {
            return Err(crate::error::RelayError::NoActiveStream);
        }
        self.viewers.write().await.insert(viewer.viewer_id, viewer);
        self.refresh_host_snapshot().await;
        Ok(())
    }

    #[must_use]
    pub async fn viewer_by_id(&self, viewer_id: uuid::Uuid) -> Option<Arc<WhepSession>> {
        self.viewers.read().await.get(&viewer_id).cloned()
    }

    async fn refresh_host_snapshot(&self) {
        if let Some(host) = self.host.read().await.as_ref() {
            host.publish_viewers(self.viewers.read().await.clone());
        }
    }

    /// Callback invoked once a viewer's close-once latch has run.
    pub async fn handle_viewer_close(self: &Arc<Self>, viewer_id: uuid::Uuid) {
        self.viewers.write().await.remove(&viewer_id);
        self.refresh_host_snapshot().await;
        if self.is_empty().await {
            self.close().await;
        }
    }

    /// Callback invoked once the host's close-once latch has run.
    pub async fn handle_host_closed(self: &Arc<Self>) {
        self.remove_host().await;
        if self.is_empty().await {
            self.close().await;
        }
    }

    /// Empty means no viewers *and* no host-borne tracks; a host with zero
    /// tracks isn't enough on its own to keep the session alive.
    async fn is_empty(&self) -> bool {
        if !self.viewers.read().await.is_empty() {
            return false;
        }
        match self.host.read().await.as_ref() {
            Some(host) => !host.has_tracks().await,
            None => true,
        }
    }

    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let viewers: Vec<_> = self.viewers.write().await.drain().map(|(_, v)| v).collect();
        for viewer in viewers {
            viewer.close().await;
        }

        if let Some(host) = self.host.write().await.take() {
            host.notify_closed().await;
        }

        info!(stream_key = %self.stream_key, "stream session closed");
        (self.on_close)(self.stream_key.clone());
    }

    /// Point-in-time snapshot used by the status bus and `/api/status`.
    pub async fn snapshot(&self) -> StreamStatusSnapshot {
        let status = self.status.read().await;
        StreamStatusSnapshot {
            stream_key: self.stream_key.clone(),
            motd: status.motd.clone(),
            viewers: self.viewers.read().await.len(),
            is_online: status.has_host,
            is_public: status.is_public,
            stream_start: status.stream_start,
        }
    }

    fn spawn_status_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if self.closed.load(Ordering::Acquire) {
                            break;
                        }
                        if self.is_empty().await {
                            self.close().await;
                            break;
                        }
                        // Per-viewer side-channel status push is driven by
                        // the SSE/data-channel handlers reading `snapshot()`
                        // on their own tick; this loop's job is purely the
                        // emptiness sweep and keeping the session alive.
                    }
                }
            }
        });
    }
}

/// JSON-serializable status, mirroring the `status` side-channel event.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StreamStatusSnapshot {
    pub stream_key: String,
    pub motd: String,
    pub viewers: usize,
    pub is_online: bool,
    pub is_public: bool,
    pub stream_start: Option<chrono::DateTime<chrono::Utc>>,
}
