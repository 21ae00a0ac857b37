//! Recording doubles for the channel traits.

use std::sync::Mutex;

use {
    async_trait::async_trait,
    courier_channels::{
        ChannelEvent, ChannelEventSink, ChannelMessageMeta, ChannelOutbound, ChannelReplyTarget,
    },
    courier_common::types::ReplyPayload,
};

#[derive(Default)]
pub(crate) struct RecordingOutbound {
    /// `(to, text, reply_to)`
    pub sent: Mutex<Vec<(String, String, Option<String>)>>,
    pub fail: bool,
}

#[async_trait]
impl ChannelOutbound for RecordingOutbound {
    async fn send_text(
        &self,
        _account_id: &str,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.into(), text.into(), reply_to.map(str::to_string)));
        if self.fail {
            anyhow::bail!("send failed");
        }
        Ok(())
    }

    async fn send_media(
        &self,
        account_id: &str,
        to: &str,
        payload: &ReplyPayload,
    ) -> anyhow::Result<()> {
        self.send_text(account_id, to, &payload.text, None).await
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    pub events: Mutex<Vec<ChannelEvent>>,
    pub dispatched: Mutex<Vec<(String, ChannelReplyTarget, ChannelMessageMeta)>>,
    pub commands: Mutex<Vec<String>>,
}

#[async_trait]
impl ChannelEventSink for RecordingSink {
    async fn emit(&self, event: ChannelEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn dispatch_to_chat(
        &self,
        text: &str,
        reply_to: ChannelReplyTarget,
        meta: ChannelMessageMeta,
    ) {
        self.dispatched
            .lock()
            .unwrap()
            .push((text.to_string(), reply_to, meta));
    }

    async fn dispatch_command(
        &self,
        command: &str,
        _reply_to: ChannelReplyTarget,
    ) -> anyhow::Result<String> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(format!("ran {command}"))
    }
}
