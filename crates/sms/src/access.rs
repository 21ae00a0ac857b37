//! DM access control for inbound SMS senders.
//!
//! Unknown senders on a `pairing` account get a one-time code; everything
//! else is decided by [`evaluate_dm_access`].

use {
    courier_channels::{
        ChannelEvent, ChannelEventSink, ChannelOutbound, ChannelType,
        gating::{AccessDecision, evaluate_dm_access},
        pairing::{PairingStore, build_pairing_reply},
    },
    tracing::{debug, info, warn},
};

use crate::{CHANNEL_ID, config::SmsAccountConfig};

/// Everything needed to gate one sender on one account.
pub struct AccessGate<'a> {
    pub account_id: &'a str,
    pub config: &'a SmsAccountConfig,
    pub store: &'a dyn PairingStore,
    pub outbound: &'a dyn ChannelOutbound,
    pub event_sink: Option<&'a dyn ChannelEventSink>,
}

impl AccessGate<'_> {
    /// Evaluate DM access for `sender_id`.
    ///
    /// When this call mints a pairing code, the pairing instructions are sent
    /// back to the conversation once. Later messages from the same pending
    /// sender stay silent until the code expires or is approved. A failed
    /// pairing reply is logged and not retried.
    pub async fn authorize(&self, conversation_id: &str, sender_id: &str) -> AccessDecision {
        let decision = evaluate_dm_access(
            self.config.dm_policy,
            &self.config.allow_from,
            self.store,
            CHANNEL_ID,
            sender_id,
        )
        .await;

        match &decision {
            AccessDecision::Authorized => {
                debug!(account_id = self.account_id, sender_id, "sender authorized");
            },
            AccessDecision::Blocked(reason) => {
                info!(
                    account_id = self.account_id,
                    sender_id,
                    %reason,
                    "sms message denied"
                );
            },
            AccessDecision::PairingPending {
                code,
                created: true,
            } => {
                info!(
                    account_id = self.account_id,
                    sender_id, "issued pairing code to unknown sender"
                );
                let reply = build_pairing_reply(CHANNEL_ID, sender_id, code);
                if let Err(e) = self
                    .outbound
                    .send_text(self.account_id, conversation_id, &reply, None)
                    .await
                {
                    warn!(
                        account_id = self.account_id,
                        sender_id, "failed to send pairing reply: {e:#}"
                    );
                }
                if let Some(sink) = self.event_sink {
                    sink.emit(ChannelEvent::PairingRequested {
                        channel_type: ChannelType::Sms,
                        account_id: self.account_id.to_string(),
                        peer_id: sender_id.to_string(),
                        code: code.clone(),
                    })
                    .await;
                }
            },
            AccessDecision::PairingPending { created: false, .. } => {
                debug!(
                    account_id = self.account_id,
                    sender_id, "pairing already pending, not replying"
                );
            },
        }

        decision
    }
}
