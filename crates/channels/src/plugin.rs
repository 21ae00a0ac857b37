use {
    anyhow::Result,
    async_trait::async_trait,
    courier_common::types::{MediaAttachment, ReplyPayload},
};

// ── Channel identity ────────────────────────────────────────────────────────

/// Messaging platforms courier can relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Sms,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Channel events (pub/sub) ────────────────────────────────────────────────

/// Events emitted by channel plugins for observers (logs, dashboards).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelEvent {
    InboundMessage {
        channel_type: ChannelType,
        account_id: String,
        peer_id: String,
        sender_name: Option<String>,
        /// Number of raw messages coalesced into this dispatch.
        message_count: Option<i64>,
        access_granted: bool,
    },
    /// A pairing code was issued to a sender that is not allowlisted.
    PairingRequested {
        channel_type: ChannelType,
        account_id: String,
        peer_id: String,
        code: String,
    },
    /// A reaction arrived on a message.
    Reaction {
        channel_type: ChannelType,
        account_id: String,
        peer_id: String,
        message_id: String,
        reaction: String,
    },
}

/// Sink for channel events. The gateway provides the concrete implementation
/// and is the boundary between the channel and the agent.
#[async_trait]
pub trait ChannelEventSink: Send + Sync {
    /// Broadcast a channel event.
    async fn emit(&self, event: ChannelEvent);

    /// Dispatch an authorized inbound message to the agent. The reply is
    /// delivered back to `reply_to` before this returns.
    async fn dispatch_to_chat(
        &self,
        text: &str,
        reply_to: ChannelReplyTarget,
        meta: ChannelMessageMeta,
    );

    /// Dispatch a slash command (e.g. "new", "clear", "compact", "context")
    /// and return a text result to send back to the channel.
    async fn dispatch_command(&self, command: &str, reply_to: ChannelReplyTarget)
    -> Result<String>;
}

/// What kind of content an inbound message carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMessageKind {
    Text,
    Media,
    /// Several raw messages merged by the debouncer.
    Batch,
}

/// Metadata about a channel message, passed along with the dispatched text.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelMessageMeta {
    pub channel_type: ChannelType,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub message_kind: Option<ChannelMessageKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaAttachment>,
    /// Raw platform timestamp of the (last) inbound message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Default model configured for this channel account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Where to send the agent response back.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChannelReplyTarget {
    pub channel_type: ChannelType,
    pub account_id: String,
    /// Conversation ID to send the reply to.
    pub chat_id: String,
    /// Platform message ID to thread the reply under, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Core channel plugin trait. Each messaging platform implements this.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Channel identifier (e.g. "sms").
    fn id(&self) -> &str;

    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Start an account connection.
    async fn start_account(&mut self, account_id: &str, config: serde_json::Value) -> Result<()>;

    /// Stop an account connection.
    async fn stop_account(&mut self, account_id: &str) -> Result<()>;

    /// Get outbound adapter for sending messages.
    fn outbound(&self) -> Option<&dyn ChannelOutbound>;

    /// Get status adapter for health checks.
    fn status(&self) -> Option<&dyn ChannelStatus>;
}

/// Send messages to a channel.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(
        &self,
        account_id: &str,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<()>;

    async fn send_media(&self, account_id: &str, to: &str, payload: &ReplyPayload) -> Result<()>;

    /// Send a "typing" indicator. No-op by default.
    async fn send_typing(&self, _account_id: &str, _to: &str) -> Result<()> {
        Ok(())
    }
}

/// Probe channel account health.
#[async_trait]
pub trait ChannelStatus: Send + Sync {
    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot>;
}

/// Channel health snapshot.
#[derive(Debug, Clone)]
pub struct ChannelHealthSnapshot {
    pub connected: bool,
    pub account_id: String,
    pub details: Option<String>,
}
