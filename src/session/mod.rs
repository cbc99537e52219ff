//! Two-level session registry: stream key -> [`StreamSession`], each
//! pairing one ingest host with many viewers.

pub mod stream_session;
pub mod whep;
pub mod whip;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::RelayError;
use crate::profiles::StreamProfile;
use stream_session::{StreamSession, StreamStatusSnapshot};
use whep::WhepSession;
use whip::WhipSession;

/// Registry of all live stream sessions, keyed by stream key.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<StreamSession>>>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Get the session for `profile.stream_key`, creating it if absent. If
    /// `is_ingest`, refreshes the session's MOTD/visibility from `profile`
    /// and marks it as having a host.
    pub async fn get_or_add_session(self: &Arc<Self>, profile: &StreamProfile, is_ingest: bool) -> Arc<StreamSession> {
        if let Some(existing) = self.sessions.read().await.get(&profile.stream_key) {
            if is_ingest {
                existing.update_stream_status(profile).await;
            }
            return existing.clone();
        }

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&profile.stream_key) {
            if is_ingest {
                existing.update_stream_status(profile).await;
            }
            return existing.clone();
        }

        let manager = Arc::downgrade(self);
        let stream_key = profile.stream_key.clone();
        let on_close: Arc<dyn Fn(String) + Send + Sync> = Arc::new(move |key: String| {
            if let Some(manager) = manager.upgrade() {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager.sessions.write().await.remove(&key);
                });
            }
        });

        let session = StreamSession::new(stream_key, on_close);
        if is_ingest {
            session.update_stream_status(profile).await;
        }
        sessions.insert(profile.stream_key.clone(), session.clone());
        session
    }

    #[must_use]
    pub async fn get_by_stream_key(&self, stream_key: &str) -> Option<Arc<StreamSession>> {
        self.sessions.read().await.get(stream_key).cloned()
    }

    /// Find a viewer by id across every live session.
    pub async fn get_viewer_by_id(&self, viewer_id: uuid::Uuid) -> Option<Arc<WhepSession>> {
        self.get_session_and_viewer_by_id(viewer_id).await.map(|(_, v)| v)
    }

    pub async fn get_session_and_viewer_by_id(
        &self,
        viewer_id: uuid::Uuid,
    ) -> Option<(Arc<StreamSession>, Arc<WhepSession>)> {
        for session in self.sessions.read().await.values() {
            if let Some(viewer) = session.viewer_by_id(viewer_id).await {
                return Some((session.clone(), viewer));
            }
        }
        None
    }

    pub async fn get_host_by_id(&self, host_id: uuid::Uuid) -> Option<Arc<WhipSession>> {
        for session in self.sessions.read().await.values() {
            if let Some(host) = session.host().await {
                if host.host_id == host_id {
                    return Some(host);
                }
            }
        }
        None
    }

    pub async fn get_session_by_host_id(&self, host_id: uuid::Uuid) -> Option<Arc<StreamSession>> {
        for session in self.sessions.read().await.values() {
            if let Some(host) = session.host().await {
                if host.host_id == host_id {
                    return Some(session.clone());
                }
            }
        }
        None
    }

    pub async fn update_profile(&self, profile: &StreamProfile) {
        if let Some(session) = self.sessions.read().await.get(&profile.stream_key) {
            session.update_stream_status(profile).await;
        }
    }

    /// Snapshot every session's status, filtering private streams unless
    /// `include_private`.
    pub async fn list_session_states(&self, include_private: bool) -> Vec<StreamStatusSnapshot> {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions {
            let snapshot = session.snapshot().await;
            if include_private || snapshot.is_public {
                out.push(snapshot);
            }
        }
        out
    }
}
