//! Inbound pipeline: webhook event -> debouncer -> access gate -> agent.

use std::sync::Arc;

use {
    async_trait::async_trait,
    courier_channels::{
        ChannelEvent, ChannelEventSink, ChannelMessageKind, ChannelMessageMeta, ChannelOutbound,
        ChannelReplyTarget, ChannelType,
        commands::{HELP_TEXT, contains_control_command, parse_command},
        debounce::{DebounceHandler, DebounceKey, InboundDebouncer},
        pairing::PairingStore,
    },
    courier_common::types::MediaAttachment,
    tracing::{debug, info, trace, warn},
};

use crate::{
    CHANNEL_ID,
    access::AccessGate,
    config::SmsAccountConfig,
    event::{InboundEvent, MessageReceived},
    outbound::SmsClient,
    server::WebhookEventHandler,
};

/// One inbound message as queued for coalescing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub account_id: String,
    pub conversation_id: String,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub from_me: bool,
    pub message_id: Option<String>,
    pub reply_to: Option<String>,
    pub timestamp: Option<String>,
    pub service: Option<String>,
    pub text: String,
    pub media: Vec<MediaAttachment>,
}

impl InboundMessage {
    pub fn from_event(account_id: &str, event: &MessageReceived) -> Self {
        Self {
            account_id: account_id.to_string(),
            conversation_id: event.conversation_id.clone(),
            sender_id: event.sender_id().map(str::to_string),
            sender_name: event.sender_name.clone(),
            from_me: event.from_me,
            message_id: event.message_id.clone(),
            reply_to: event.reply_to.as_ref().map(|r| r.message_id.clone()),
            timestamp: event.timestamp.clone(),
            service: event.service.clone(),
            text: event.text(),
            media: event.media(),
        }
    }
}

/// A flushed batch reduced to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedMessage {
    pub message: InboundMessage,
    /// How many raw messages were merged.
    pub count: usize,
}

impl MergedMessage {
    pub fn kind(&self) -> ChannelMessageKind {
        if self.count > 1 {
            ChannelMessageKind::Batch
        } else if self.message.media.is_empty() {
            ChannelMessageKind::Text
        } else {
            ChannelMessageKind::Media
        }
    }
}

/// Merge a batch: non-empty texts joined by newlines, everything else
/// (ids, timestamp, media) taken from the last entry. Media on earlier
/// entries is dropped.
pub fn merge_batch(entries: Vec<InboundMessage>) -> Option<MergedMessage> {
    let count = entries.len();
    let mut texts = Vec::with_capacity(count);
    let mut dropped_media = 0usize;
    let mut last: Option<InboundMessage> = None;

    for mut entry in entries {
        let text = std::mem::take(&mut entry.text);
        if !text.trim().is_empty() {
            texts.push(text);
        }
        if let Some(previous) = last.replace(entry) {
            dropped_media += previous.media.len();
        }
    }

    let mut message = last?;
    if dropped_media > 0 {
        debug!(
            conversation_id = %message.conversation_id,
            dropped_media,
            "coalesced batch keeps only the last message's media"
        );
    }
    message.text = texts.join("\n");
    Some(MergedMessage { message, count })
}

/// Processes flushed batches for one account.
pub struct SmsInboundHandler {
    pub(crate) account_id: String,
    pub(crate) config: SmsAccountConfig,
    pub(crate) client: Arc<SmsClient>,
    pub(crate) outbound: Arc<dyn ChannelOutbound>,
    pub(crate) store: Arc<dyn PairingStore>,
    pub(crate) event_sink: Option<Arc<dyn ChannelEventSink>>,
}

#[async_trait]
impl DebounceHandler<InboundMessage> for SmsInboundHandler {
    fn key(&self, entry: &InboundMessage) -> Option<DebounceKey> {
        let sender_id = entry.sender_id.as_deref()?;
        Some(DebounceKey {
            channel: CHANNEL_ID.to_string(),
            account_id: entry.account_id.clone(),
            conversation_id: entry.conversation_id.clone(),
            sender_id: sender_id.to_string(),
        })
    }

    fn should_debounce(&self, entry: &InboundMessage) -> bool {
        !entry.text.trim().is_empty() && !contains_control_command(&entry.text)
    }

    async fn flush(&self, entries: Vec<InboundMessage>) -> anyhow::Result<()> {
        match merge_batch(entries) {
            Some(merged) => self.process(merged).await,
            None => Ok(()),
        }
    }
}

impl SmsInboundHandler {
    async fn process(&self, merged: MergedMessage) -> anyhow::Result<()> {
        let kind = merged.kind();
        let count = merged.count;
        let msg = merged.message;
        let Some(sender_id) = msg.sender_id.as_deref() else {
            return Ok(());
        };
        let conversation_id = msg.conversation_id.as_str();

        let gate = AccessGate {
            account_id: &self.account_id,
            config: &self.config,
            store: self.store.as_ref(),
            outbound: self.outbound.as_ref(),
            event_sink: self.event_sink.as_deref(),
        };
        let decision = gate.authorize(conversation_id, sender_id).await;

        if let Some(sink) = &self.event_sink {
            sink.emit(ChannelEvent::InboundMessage {
                channel_type: ChannelType::Sms,
                account_id: self.account_id.clone(),
                peer_id: sender_id.to_string(),
                sender_name: msg.sender_name.clone(),
                message_count: Some(count as i64),
                access_granted: decision.is_authorized(),
            })
            .await;
        }
        if !decision.is_authorized() {
            return Ok(());
        }

        if msg.text.is_empty() && msg.media.is_empty() {
            debug!(
                account_id = %self.account_id,
                conversation_id, "inbound message has no usable content"
            );
            return Ok(());
        }

        let Some(sink) = self.event_sink.as_ref() else {
            warn!(
                account_id = %self.account_id,
                "no event sink configured, dropping authorized message"
            );
            return Ok(());
        };

        info!(
            account_id = %self.account_id,
            conversation_id,
            sender_id,
            messages = count,
            text_len = msg.text.len(),
            media = msg.media.len(),
            "sms inbound message"
        );

        let acknowledged = self.acknowledge(conversation_id);

        let reply_to = ChannelReplyTarget {
            channel_type: ChannelType::Sms,
            account_id: self.account_id.clone(),
            chat_id: conversation_id.to_string(),
            message_id: msg.message_id.clone(),
        };

        if let Some((name, command)) = parse_command(&msg.text) {
            let response = if name == "help" {
                Ok(HELP_TEXT.to_string())
            } else {
                sink.dispatch_command(command, reply_to).await
            };
            let text = match response {
                Ok(text) => text,
                Err(e) => format!("Command failed: {e}"),
            };
            if !text.trim().is_empty()
                && let Err(e) = self
                    .outbound
                    .send_text(
                        &self.account_id,
                        conversation_id,
                        &text,
                        msg.message_id.as_deref(),
                    )
                    .await
            {
                warn!(
                    account_id = %self.account_id,
                    conversation_id, "failed to send command response: {e:#}"
                );
            }
        } else {
            let meta = ChannelMessageMeta {
                channel_type: ChannelType::Sms,
                sender_id: sender_id.to_string(),
                sender_name: msg.sender_name.clone(),
                message_kind: Some(kind),
                media: msg.media.clone(),
                timestamp: msg.timestamp.clone(),
                model: self.config.model.clone(),
            };
            sink.dispatch_to_chat(&msg.text, reply_to, meta).await;
        }

        if let Some(handle) = acknowledged {
            let _ = handle.await;
        }
        if self.config.typing_indicator {
            self.client.stop_typing(conversation_id).await;
        }
        Ok(())
    }

    /// Read receipt then typing indicator, in the background.
    fn acknowledge(&self, conversation_id: &str) -> Option<tokio::task::JoinHandle<()>> {
        let read = self.config.send_read_receipts;
        let typing = self.config.typing_indicator;
        if !read && !typing {
            return None;
        }
        let client = Arc::clone(&self.client);
        let conversation_id = conversation_id.to_string();
        Some(tokio::spawn(async move {
            if read && !client.mark_as_read(&conversation_id).await {
                debug!(conversation_id = %conversation_id, "read receipt not delivered");
            }
            if typing && !client.start_typing(&conversation_id).await {
                debug!(conversation_id = %conversation_id, "typing indicator not delivered");
            }
        }))
    }
}

/// Routes parsed webhook events for one account.
pub struct EventRouter {
    pub(crate) account_id: String,
    pub(crate) debouncer: Arc<InboundDebouncer<InboundMessage>>,
    pub(crate) event_sink: Option<Arc<dyn ChannelEventSink>>,
}

#[async_trait]
impl WebhookEventHandler for EventRouter {
    async fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::MessageReceived(msg) => {
                if msg.from_me {
                    debug!(account_id = %self.account_id, "ignoring own message");
                    return;
                }
                if msg.sender_id().is_none() {
                    debug!(
                        account_id = %self.account_id,
                        conversation_id = %msg.conversation_id,
                        "ignoring message without sender"
                    );
                    return;
                }
                self.debouncer
                    .enqueue(InboundMessage::from_event(&self.account_id, &msg));
            },
            InboundEvent::ReactionReceived(reaction) => {
                if reaction.from_me {
                    return;
                }
                let (Some(sender), Some(message_id), Some(value)) = (
                    reaction.sender.clone(),
                    reaction.message_id.clone(),
                    reaction.reaction.clone(),
                ) else {
                    debug!(account_id = %self.account_id, "incomplete reaction event");
                    return;
                };
                info!(
                    account_id = %self.account_id,
                    conversation_id = %reaction.conversation_id,
                    sender = %sender,
                    message_id = %message_id,
                    reaction = %value,
                    "sms reaction received"
                );
                if let Some(sink) = &self.event_sink {
                    sink.emit(ChannelEvent::Reaction {
                        channel_type: ChannelType::Sms,
                        account_id: self.account_id.clone(),
                        peer_id: sender,
                        message_id,
                        reaction: value,
                    })
                    .await;
                }
            },
            InboundEvent::DeliveryStatus(status) => {
                debug!(
                    account_id = %self.account_id,
                    conversation_id = %status.conversation_id,
                    message_id = status.message_id.as_deref().unwrap_or_default(),
                    status = status.status.as_deref().unwrap_or_default(),
                    "sms delivery status"
                );
            },
            InboundEvent::Unknown(event_type) => {
                trace!(account_id = %self.account_id, event_type = %event_type, "ignoring unknown sms event");
            },
        }
    }
}
