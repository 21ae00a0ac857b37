use std::sync::Arc;

use {
    async_trait::async_trait,
    tracing::{debug, error, info, warn},
};

use {
    courier_channels::{
        ChannelEvent, ChannelEventSink, ChannelMessageMeta, ChannelOutbound, ChannelReplyTarget,
    },
    courier_common::types::ReplyPayload,
};

use crate::{
    agent::{AgentBackend, AgentTurn},
    envelope::EnvelopeFormatter,
    session::SessionResolver,
};

/// Bridges channel plugins to the agent backend and routes replies back
/// through the channel's outbound adapter.
pub struct GatewayChannelEventSink {
    sessions: Arc<dyn SessionResolver>,
    formatter: Arc<dyn EnvelopeFormatter>,
    agent: Arc<dyn AgentBackend>,
    outbound: Arc<dyn ChannelOutbound>,
}

impl GatewayChannelEventSink {
    pub fn new(
        sessions: Arc<dyn SessionResolver>,
        formatter: Arc<dyn EnvelopeFormatter>,
        agent: Arc<dyn AgentBackend>,
        outbound: Arc<dyn ChannelOutbound>,
    ) -> Self {
        Self {
            sessions,
            formatter,
            agent,
            outbound,
        }
    }

    async fn deliver(&self, target: &ChannelReplyTarget, mut reply: ReplyPayload) {
        if reply.reply_to_id.is_none() {
            reply.reply_to_id = target.message_id.clone();
        }
        let result = if reply.media.is_some() {
            self.outbound
                .send_media(&target.account_id, &target.chat_id, &reply)
                .await
        } else {
            self.outbound
                .send_text(
                    &target.account_id,
                    &target.chat_id,
                    &reply.text,
                    reply.reply_to_id.as_deref(),
                )
                .await
        };
        if let Err(e) = result {
            warn!(
                account_id = %target.account_id,
                chat_id = %target.chat_id,
                "failed to deliver agent reply: {e:#}"
            );
        }
    }
}

#[async_trait]
impl ChannelEventSink for GatewayChannelEventSink {
    async fn emit(&self, event: ChannelEvent) {
        match serde_json::to_value(&event) {
            Ok(payload) => debug!(event = %payload, "channel event"),
            Err(e) => warn!("failed to serialize channel event: {e}"),
        }
    }

    async fn dispatch_to_chat(
        &self,
        text: &str,
        reply_to: ChannelReplyTarget,
        meta: ChannelMessageMeta,
    ) {
        let session_key = self.sessions.resolve(&reply_to);
        let envelope = self.formatter.format(text, &meta);
        info!(
            session_key = %session_key,
            account_id = %reply_to.account_id,
            chat_id = %reply_to.chat_id,
            peer_id = %meta.sender_id,
            "dispatching channel message to agent"
        );

        let turn = AgentTurn {
            session_key,
            envelope,
            reply_to,
            meta,
        };
        match self.agent.run_turn(&turn).await {
            Ok(replies) => {
                for reply in replies.into_iter().filter(|r| !r.is_empty()) {
                    self.deliver(&turn.reply_to, reply).await;
                }
            },
            Err(e) => error!(session_key = %turn.session_key, "agent turn failed: {e:#}"),
        }
    }

    async fn dispatch_command(
        &self,
        command: &str,
        reply_to: ChannelReplyTarget,
    ) -> anyhow::Result<String> {
        let cmd = command.split_whitespace().next().unwrap_or_default();
        match cmd.to_ascii_lowercase().as_str() {
            "new" => {
                let key = self.sessions.reset(&reply_to);
                Ok(format!("New session started ({key})."))
            },
            "clear" => {
                self.sessions.reset(&reply_to);
                Ok("Session history cleared.".to_string())
            },
            "status" | "context" => {
                let key = self.sessions.resolve(&reply_to);
                Ok(format!(
                    "Session: {key}\nChannel: {} / {}",
                    reply_to.channel_type, reply_to.account_id
                ))
            },
            _ => {
                let key = self.sessions.resolve(&reply_to);
                self.agent.run_command(&key, command).await
            },
        }
    }
}
