//! Binds the chat engine to a viewer's `"bb-chat-v1"` reliable data channel:
//! on open, subscribe to the stream's room and push `Connected` then a full
//! history snapshot; forward subsequent message events; validate and relay
//! inbound `chat.send` envelopes.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use crate::chat::engine::{ChatManager, Event, Message, Subscription};

pub const DATA_CHANNEL_LABEL: &str = "bb-chat-v1";

const MIN_TEXT_LEN: usize = 1;
const MAX_TEXT_LEN: usize = 2000;
const MIN_DISPLAY_NAME_LEN: usize = 1;
const MAX_DISPLAY_NAME_LEN: usize = 80;

#[derive(Debug, serde::Deserialize)]
struct InboundMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "clientMsgId", default)]
    client_msg_id: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(rename = "displayName", default)]
    display_name: String,
}

#[derive(Debug, Default, serde::Serialize)]
struct OutboundMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "clientMsgId", skip_serializing_if = "Option::is_none")]
    client_msg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(rename = "eventId", skip_serializing_if = "Option::is_none")]
    event_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<Event>>,
}

impl OutboundMessage {
    fn connected() -> Self {
        Self { kind: "chat.connected", ..Default::default() }
    }

    fn history(events: Vec<Event>) -> Self {
        Self { kind: "chat.history", events: Some(events), ..Default::default() }
    }

    fn message(event_id: u64, message: Message) -> Self {
        Self {
            kind: "chat.message",
            event_id: Some(event_id),
            message: Some(message),
            ..Default::default()
        }
    }

    fn error(error: impl Into<String>, client_msg_id: Option<String>) -> Self {
        Self {
            kind: "chat.error",
            error: Some(error.into()),
            client_msg_id,
            ..Default::default()
        }
    }

    fn ack(client_msg_id: Option<String>) -> Self {
        Self { kind: "chat.ack", client_msg_id, ..Default::default() }
    }
}

/// Wire a `"bb-chat-v1"` data channel to the chat engine for one viewer.
/// A no-op if `channel`'s label doesn't match.
pub fn bind(stream_key: String, peer_id: uuid::Uuid, channel: Arc<RTCDataChannel>, chat: Arc<ChatManager>) {
    if channel.label() != DATA_CHANNEL_LABEL {
        return;
    }

    let subscription: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    {
        let channel = channel.clone();
        let chat = chat.clone();
        let stream_key = stream_key.clone();
        let subscription = subscription.clone();
        channel.on_open(Box::new(move || {
                Box::pin(async move {
                    info!(%stream_key, %peer_id, "chat data channel open");

                    let (mut rx, sub, history) = chat.subscribe_stream(&stream_key, 0).await;
                    *subscription.lock().await = Some(sub);

                    if !send(&channel, &OutboundMessage::connected()).await {
                        unsubscribe(&subscription).await;
                        return;
                    }

                    if !history.is_empty() && !send(&channel, &OutboundMessage::history(history)).await {
                        unsubscribe(&subscription).await;
                        return;
                    }

                    let channel = channel.clone();
                    let subscription = subscription.clone();
                    tokio::spawn(async move {
                        while let Some(event) = rx.recv().await {
                            let event_id = event.id;
                            if !send(&channel, &OutboundMessage::message(event_id, event.message)).await {
                                unsubscribe(&subscription).await;
                                return;
                            }
                        }
                    });
                })
            }));
    }

    {
        let chat = chat.clone();
        let stream_key = stream_key.clone();
        let channel = channel.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let chat = chat.clone();
            let stream_key = stream_key.clone();
            let channel = channel.clone();
            Box::pin(async move {
                handle_inbound(&channel, &chat, &stream_key, &msg).await;
            })
        }));
    }

    {
        let subscription = subscription.clone();
        let stream_key = stream_key.clone();
        channel.on_close(Box::new(move || {
            let subscription = subscription.clone();
            let stream_key = stream_key.clone();
            Box::pin(async move {
                info!(%stream_key, %peer_id, "chat data channel closed");
                unsubscribe(&subscription).await;
            })
        }));
    }

    {
        let subscription = subscription.clone();
        let stream_key = stream_key.clone();
        channel.on_error(Box::new(move |err| {
            let subscription = subscription.clone();
            let stream_key = stream_key.clone();
            Box::pin(async move {
                warn!(%stream_key, %peer_id, error = %err, "chat data channel error");
                unsubscribe(&subscription).await;
            })
        }));
    }
}

async fn handle_inbound(channel: &RTCDataChannel, chat: &ChatManager, stream_key: &str, msg: &DataChannelMessage) {
    let inbound: InboundMessage = match serde_json::from_slice(&msg.data) {
        Ok(v) => v,
        Err(_) => {
            send(channel, &OutboundMessage::error("invalid payload", None)).await;
            return;
        }
    };

    if inbound.kind != "chat.send" {
        send(channel, &OutboundMessage::error("unsupported message type", None)).await;
        return;
    }

    let text = inbound.text.trim();
    let display_name = inbound.display_name.trim();

    if text.chars().count() < MIN_TEXT_LEN || text.chars().count() > MAX_TEXT_LEN {
        send(channel, &OutboundMessage::error("invalid message length", inbound.client_msg_id)).await;
        return;
    }
    if display_name.chars().count() < MIN_DISPLAY_NAME_LEN || display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
        send(channel, &OutboundMessage::error("invalid display name length", inbound.client_msg_id)).await;
        return;
    }

    chat.send_to_stream(stream_key, text, display_name).await;
    send(channel, &OutboundMessage::ack(inbound.client_msg_id)).await;
}

async fn send(channel: &RTCDataChannel, payload: &OutboundMessage) -> bool {
    let data = match serde_json::to_string(payload) {
        Ok(data) => data,
        Err(err) => {
            warn!(error = %err, "chat data channel marshal error");
            return false;
        }
    };
    if let Err(err) = channel.send_text(data).await {
        warn!(error = %err, "chat data channel send error");
        return false;
    }
    true
}

async fn unsubscribe(subscription: &Mutex<Option<Subscription>>) {
    if let Some(sub) = subscription.lock().await.as_ref() {
        sub.unsubscribe().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_history_skips_empty_optional_fields() {
        let payload = OutboundMessage::connected();
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"type":"chat.connected"}"#);
    }

    #[test]
    fn outbound_error_carries_client_msg_id_when_present() {
        let payload = OutboundMessage::error("invalid message length", Some("abc".to_string()));
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"clientMsgId\":\"abc\""));
        assert!(json.contains("\"error\":\"invalid message length\""));
    }

    #[test]
    fn inbound_send_envelope_parses_from_json() {
        let raw = r#"{"type":"chat.send","clientMsgId":"x1","text":"hi","displayName":"bob"}"#;
        let inbound: InboundMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(inbound.kind, "chat.send");
        assert_eq!(inbound.text, "hi");
        assert_eq!(inbound.display_name, "bob");
        assert_eq!(inbound.client_msg_id.as_deref(), Some("x1"));
    }
}
