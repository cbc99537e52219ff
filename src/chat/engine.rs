//! In-memory chat rooms keyed by stream key: pub/sub with bounded ring
//! history and resumable subscription via monotonic event ids, plus a
//! background TTL sweep for idle sessions and empty idle rooms.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;

use crate::config::ChatConfig;
use crate::error::RelayError;

pub const EVENT_TYPE_MESSAGE: &str = "message";

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 100;

/// One chat message, as delivered to subscribers and serialized over SSE /
/// the data channel.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Message {
    pub id: String,
    pub ts: i64,
    pub text: String,
    pub display_name: String,
}

/// A room event. `id` is the room-local monotonic sequence number used for
/// resumable subscription; it's read off the wrapper by callers (e.g. the
/// SSE `id:` line) rather than serialized into the payload itself.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Event {
    #[serde(skip)]
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: Message,
}

/// A chat session bound to a stream key, used by the REST fallback surface.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub id: uuid::Uuid,
    pub stream_key: String,
}

struct SessionEntry {
    stream_key: String,
    last_activity: Instant,
}

struct Subscriber {
    sender: mpsc::Sender<Event>,
}

struct Room {
    subscribers: HashMap<uuid::Uuid, Subscriber>,
    history: VecDeque<Event>,
    next_event_id: u64,
    last_activity: Instant,
}

impl Room {
    fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            history: VecDeque::new(),
            next_event_id: 1,
            last_activity: Instant::now(),
        }
    }
}

struct Inner {
    rooms: HashMap<String, Arc<Mutex<Room>>>,
    sessions: HashMap<uuid::Uuid, SessionEntry>,
}

fn get_or_create_room(inner: &mut Inner, stream_key: &str) -> Arc<Mutex<Room>> {
    inner
        .rooms
        .entry(stream_key.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(Room::new())))
        .clone()
}

/// A live subscription. Callers must call [`Subscription::unsubscribe`]
/// explicitly from the owning connection's close path; dropping it without
/// unsubscribing leaves the room holding a stale sender until the next TTL
/// sweep.
pub struct Subscription {
    room: Arc<Mutex<Room>>,
    subscriber_id: uuid::Uuid,
    unsubscribed: AtomicBool,
}

impl Subscription {
    pub async fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.room.lock().await.subscribers.remove(&self.subscriber_id);
    }
}

async fn subscribe_to_room(room: Arc<Mutex<Room>>, last_event_id: u64) -> (mpsc::Receiver<Event>, Subscription, Vec<Event>) {
    let mut guard = room.lock().await;
    guard.last_activity = Instant::now();

    let subscriber_id = uuid::Uuid::new_v4();
    let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
    guard.subscribers.insert(subscriber_id, Subscriber { sender });

    let backlog: Vec<Event> = if last_event_id > 0 {
        guard.history.iter().filter(|ev| ev.id > last_event_id).cloned().collect()
    } else {
        guard.history.iter().cloned().collect()
    };
    drop(guard);

    (
        receiver,
        Subscription {
            room,
            subscriber_id,
            unsubscribed: AtomicBool::new(false),
        },
        backlog,
    )
}

async fn send_to_room(room: &Arc<Mutex<Room>>, max_history: usize, text: &str, display_name: &str) {
    let mut guard = room.lock().await;
    guard.last_activity = Instant::now();

    let event = Event {
        id: guard.next_event_id,
        kind: EVENT_TYPE_MESSAGE,
        message: Message {
            id: uuid::Uuid::new_v4().to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
            text: text.to_string(),
            display_name: display_name.to_string(),
        },
    };
    guard.next_event_id += 1;

    if guard.history.len() >= max_history {
        guard.history.pop_front();
    }
    guard.history.push_back(event.clone());

    guard.subscribers.retain(|_, sub| sub.sender.try_send(event.clone()).is_ok() || !sub.sender.is_closed());
}

/// In-memory chat engine: one room per stream key, sessions bound to a
/// stream key, and a background TTL sweep that reaps idle sessions and
/// empty idle rooms.
pub struct ChatManager {
    inner: RwLock<Inner>,
    max_history: usize,
    default_ttl: Duration,
}

impl ChatManager {
    #[must_use]
    pub fn new(config: &ChatConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            inner: RwLock::new(Inner {
                rooms: HashMap::new(),
                sessions: HashMap::new(),
            }),
            max_history: config.max_history,
            default_ttl: config.default_ttl,
        });
        manager.clone().spawn_cleanup_loop(config.cleanup_interval);
        manager
    }

    /// Create a chat session bound to `stream_key`, ensuring its room exists.
    pub async fn connect(&self, stream_key: &str) -> uuid::Uuid {
        let session_id = uuid::Uuid::new_v4();
        let mut inner = self.inner.write().await;
        inner.sessions.insert(
            session_id,
            SessionEntry {
                stream_key: stream_key.to_string(),
                last_activity: Instant::now(),
            },
        );
        get_or_create_room(&mut inner, stream_key);
        session_id
    }

    pub async fn get_session(&self, session_id: uuid::Uuid) -> Option<ChatSession> {
        let mut inner = self.inner.write().await;
        let entry = inner.sessions.get_mut(&session_id)?;
        entry.last_activity = Instant::now();
        Some(ChatSession {
            id: session_id,
            stream_key: entry.stream_key.clone(),
        })
    }

    pub async fn touch_session(&self, session_id: uuid::Uuid) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&session_id) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Subscribe an existing chat session to its bound stream's room.
    pub async fn subscribe(
        &self,
        session_id: uuid::Uuid,
        last_event_id: u64,
    ) -> Result<(mpsc::Receiver<Event>, Subscription, Vec<Event>), RelayError> {
        let room = {
            let mut inner = self.inner.write().await;
            let entry = inner.sessions.get_mut(&session_id).ok_or(RelayError::InvalidSession)?;
            entry.last_activity = Instant::now();
            inner.rooms.get(&entry.stream_key).cloned().ok_or(RelayError::InvalidSession)?
        };
        Ok(subscribe_to_room(room, last_event_id).await)
    }

    /// Subscribe directly by stream key, used by the data-channel binding
    /// which has no chat session of its own.
    pub async fn subscribe_stream(&self, stream_key: &str, last_event_id: u64) -> (mpsc::Receiver<Event>, Subscription, Vec<Event>) {
        let room = {
            let mut inner = self.inner.write().await;
            get_or_create_room(&mut inner, stream_key)
        };
        subscribe_to_room(room, last_event_id).await
    }

    pub async fn send(&self, session_id: uuid::Uuid, text: &str, display_name: &str) -> Result<(), RelayError> {
        let room = {
            let mut inner = self.inner.write().await;
            let entry = inner.sessions.get_mut(&session_id).ok_or(RelayError::InvalidSession)?;
            entry.last_activity = Instant::now();
            inner.rooms.get(&entry.stream_key).cloned().ok_or(RelayError::InvalidSession)?
        };
        send_to_room(&room, self.max_history, text, display_name).await;
        Ok(())
    }

    pub async fn send_to_stream(&self, stream_key: &str, text: &str, display_name: &str) {
        let room = {
            let mut inner = self.inner.write().await;
            get_or_create_room(&mut inner, stream_key)
        };
        send_to_room(&room, self.max_history, text, display_name).await;
    }

    async fn cleanup(&self) {
        let mut inner = self.inner.write().await;
        let ttl = self.default_ttl;
        let now = Instant::now();

        inner.sessions.retain(|_, entry| now.duration_since(entry.last_activity) <= ttl);

        let mut reaped = Vec::new();
        for (key, room) in &inner.rooms {
            let guard = room.lock().await;
            if guard.subscribers.is_empty() && now.duration_since(guard.last_activity) > ttl {
                reaped.push(key.clone());
            }
        }
        for key in reaped {
            inner.rooms.remove(&key);
        }
    }

    fn spawn_cleanup_loop(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                self.cleanup().await;
                info!("chat TTL sweep completed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ChatConfig {
        ChatConfig {
            max_history: 3,
            default_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn connect_and_send_delivers_to_subscriber() {
        let manager = ChatManager::new(&test_config());
        let session_id = manager.connect("alice").await;
        let (mut rx, _sub, backlog) = manager.subscribe(session_id, 0).await.unwrap();
        assert!(backlog.is_empty());

        manager.send(session_id, "hello", "alice").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.message.text, "hello");
        assert_eq!(event.id, 1);
    }

    #[tokio::test]
    async fn resume_with_last_event_id_returns_only_newer_events() {
        let manager = ChatManager::new(&test_config());
        manager.send_to_stream("bob", "one", "bob").await;
        manager.send_to_stream("bob", "two", "bob").await;
        manager.send_to_stream("bob", "three", "bob").await;

        let (_rx, _sub, backlog) = manager.subscribe_stream("bob", 1).await;
        let ids: Vec<u64> = backlog.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn history_ring_evicts_oldest_beyond_max_history() {
        let manager = ChatManager::new(&test_config()); // max_history = 3
        for i in 0..5 {
            manager.send_to_stream("carol", &format!("msg{i}"), "carol").await;
        }
        let (_rx, _sub, backlog) = manager.subscribe_stream("carol", 0).await;
        let ids: Vec<u64> = backlog.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_subscriber() {
        let manager = ChatManager::new(&test_config());
        let (_rx, sub, _backlog) = manager.subscribe_stream("dave", 0).await;
        sub.unsubscribe().await;
        sub.unsubscribe().await; // idempotent

        manager.send_to_stream("dave", "ping", "dave").await;
        // No subscriber left, but sending must not panic or error.
    }

    #[tokio::test]
    async fn subscribe_with_unknown_session_id_is_invalid_session() {
        let manager = ChatManager::new(&test_config());
        let err = manager.subscribe(uuid::Uuid::new_v4(), 0).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidSession));
    }

    #[tokio::test]
    async fn full_subscriber_channel_drops_overflow_without_blocking_others() {
        let manager = ChatManager::new(&test_config());
        let (mut slow_rx, _slow_sub, _) = manager.subscribe_stream("erin", 0).await;
        let (mut fast_rx, _fast_sub, _) = manager.subscribe_stream("erin", 0).await;

        for i in 0..(SUBSCRIBER_CHANNEL_CAPACITY + 5) {
            manager.send_to_stream("erin", &format!("m{i}"), "erin").await;
        }

        // The fast subscriber's first message should still be the very first
        // one sent; it isn't pre-empted by the slow subscriber backing up.
        let first = fast_rx.recv().await.unwrap();
        assert_eq!(first.message.text, "m0");

        // Draining the slow receiver confirms it only ever saw the channel's
        // capacity worth of messages, not all of them.
        let mut slow_count = 0;
        while slow_rx.try_recv().is_ok() {
            slow_count += 1;
        }
        assert!(slow_count <= SUBSCRIBER_CHANNEL_CAPACITY);
    }
}
