//! Webhook payloads.
//!
//! Every delivery is an envelope `{"event_type": "...", "data": {...}}`.
//! Unknown event types and unknown message parts are tolerated so the
//! platform can add new ones without breaking ingestion.

use {
    courier_common::types::MediaAttachment,
    serde::{Deserialize, Deserializer},
};

pub const MESSAGE_RECEIVED: &str = "message.received";
pub const REACTION_RECEIVED: &str = "reaction.received";
pub const DELIVERY_STATUS: &str = "message.delivery_status";

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// A parsed webhook event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    MessageReceived(MessageReceived),
    ReactionReceived(ReactionReceived),
    DeliveryStatus(DeliveryStatus),
    /// An event type this build does not know.
    Unknown(String),
}

impl InboundEvent {
    /// Parse a raw webhook body.
    pub fn parse(body: &[u8]) -> serde_json::Result<Self> {
        let envelope: WebhookEnvelope = serde_json::from_slice(body)?;
        Ok(match envelope.event_type.as_str() {
            MESSAGE_RECEIVED => Self::MessageReceived(serde_json::from_value(envelope.data)?),
            REACTION_RECEIVED => Self::ReactionReceived(serde_json::from_value(envelope.data)?),
            DELIVERY_STATUS => Self::DeliveryStatus(serde_json::from_value(envelope.data)?),
            _ => Self::Unknown(envelope.event_type),
        })
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::MessageReceived(_) => MESSAGE_RECEIVED,
            Self::ReactionReceived(_) => REACTION_RECEIVED,
            Self::DeliveryStatus(_) => DELIVERY_STATUS,
            Self::Unknown(other) => other,
        }
    }
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        #[serde(default)]
        value: String,
    },
    Media {
        #[serde(default)]
        url: Option<String>,
        #[serde(default, rename = "mimeType")]
        mime_type: Option<String>,
    },
    #[serde(other)]
    Unsupported,
}

/// Reference to the message being replied to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRef {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceived {
    pub conversation_id: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default, deserialize_with = "raw_timestamp")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    /// Underlying transport reported by the platform (e.g. `SMS`, `RCS`).
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub reply_to: Option<ReplyRef>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl MessageReceived {
    /// Text parts joined by newlines, trimmed.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { value } if !value.trim().is_empty() => Some(value.trim()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Media parts that carry both a url and a mime type.
    pub fn media(&self) -> Vec<MediaAttachment> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Media {
                    url: Some(url),
                    mime_type: Some(mime_type),
                } if !url.is_empty() && !mime_type.is_empty() => Some(MediaAttachment {
                    url: url.clone(),
                    mime_type: mime_type.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Sender id, if present and non-blank.
    pub fn sender_id(&self) -> Option<&str> {
        self.sender.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionReceived {
    pub conversation_id: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default, deserialize_with = "raw_timestamp")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub reaction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    pub conversation_id: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default, deserialize_with = "raw_timestamp")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Timestamps arrive as strings or numbers; keep them verbatim.
fn raw_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_received() {
        let body = serde_json::json!({
            "event_type": "message.received",
            "data": {
                "conversationId": "conv-1",
                "sender": "+15551234567",
                "fromMe": false,
                "timestamp": 1700000000123_u64,
                "messageId": "m1",
                "service": "SMS",
                "replyTo": { "messageId": "m0" },
                "parts": [
                    { "kind": "text", "value": " hello " },
                    { "kind": "media", "url": "https://cdn.example.com/a.jpg", "mimeType": "image/jpeg" },
                    { "kind": "sticker", "id": "s1" },
                    { "kind": "text", "value": "world" }
                ]
            }
        });
        let event = InboundEvent::parse(body.to_string().as_bytes()).unwrap();
        let InboundEvent::MessageReceived(msg) = event else {
            panic!("expected message.received");
        };
        assert_eq!(msg.text(), "hello\nworld");
        assert_eq!(msg.media().len(), 1);
        assert_eq!(msg.media()[0].mime_type, "image/jpeg");
        assert_eq!(msg.timestamp.as_deref(), Some("1700000000123"));
        assert_eq!(msg.reply_to.unwrap().message_id, "m0");
        assert_eq!(msg.parts[2], MessagePart::Unsupported);
    }

    #[test]
    fn media_without_mime_type_is_skipped() {
        let msg: MessageReceived = serde_json::from_value(serde_json::json!({
            "conversationId": "c",
            "parts": [{ "kind": "media", "url": "https://x" }]
        }))
        .unwrap();
        assert!(msg.media().is_empty());
        assert!(msg.sender_id().is_none());
    }

    #[test]
    fn unknown_event_type_is_preserved() {
        let event =
            InboundEvent::parse(br#"{"event_type":"conversation.archived","data":{"x":1}}"#)
                .unwrap();
        assert_eq!(event, InboundEvent::Unknown("conversation.archived".into()));
        assert_eq!(event.event_type(), "conversation.archived");
    }

    #[test]
    fn parses_reaction_and_delivery_status() {
        let reaction = InboundEvent::parse(
            br#"{"event_type":"reaction.received","data":{"conversationId":"c","sender":"a","fromMe":false,"timestamp":"2024-01-01T00:00:00Z","messageId":"m1","reaction":"love"}}"#,
        )
        .unwrap();
        match reaction {
            InboundEvent::ReactionReceived(r) => {
                assert_eq!(r.reaction.as_deref(), Some("love"));
                assert_eq!(r.timestamp.as_deref(), Some("2024-01-01T00:00:00Z"));
            },
            other => panic!("unexpected {other:?}"),
        }

        let status = InboundEvent::parse(
            br#"{"event_type":"message.delivery_status","data":{"conversationId":"c","fromMe":true,"messageId":"m2","status":"delivered"}}"#,
        )
        .unwrap();
        assert!(matches!(
            status,
            InboundEvent::DeliveryStatus(DeliveryStatus { ref status, .. }) if status.as_deref() == Some("delivered")
        ));
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(InboundEvent::parse(b"not json").is_err());
        assert!(InboundEvent::parse(br#"{"event_type":"message.received","data":{}}"#).is_err());
    }
}
