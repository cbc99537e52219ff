//! bbox-relay
//!
//! Single-node WebRTC broadcast relay: one WHIP ingest session fans out to
//! many WHEP viewers, with a chat side-channel carried over a WebRTC data
//! channel or a REST/SSE fallback.

pub mod chat;
pub mod config;
pub mod error;
pub mod http;
pub mod media;
pub mod profiles;
pub mod rtc;
pub mod session;
pub mod tls;
