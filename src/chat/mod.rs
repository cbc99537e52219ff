//! Text chat: an in-memory pub/sub engine per stream key, reachable either
//! through a viewer's `"bb-chat-v1"` data channel or the REST/SSE fallback
//! surface under `/api/chat/*`.

pub mod datachannel;
pub mod engine;

pub use engine::{ChatManager, ChatSession, Event, Message, Subscription};
