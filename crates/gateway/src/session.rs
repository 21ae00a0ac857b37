use std::{collections::HashMap, sync::Mutex};

use courier_channels::ChannelReplyTarget;

/// Maps a channel chat to the agent session it belongs to.
pub trait SessionResolver: Send + Sync {
    /// Active session key for the chat.
    fn resolve(&self, target: &ChannelReplyTarget) -> String;

    /// Start a fresh session for the chat and return its key.
    fn reset(&self, target: &ChannelReplyTarget) -> String;
}

/// Default (deterministic) session key for a channel chat.
pub fn default_channel_session_key(target: &ChannelReplyTarget) -> String {
    format!(
        "{}:{}:{}",
        target.channel_type, target.account_id, target.chat_id
    )
}

/// Deterministic keys with an in-process generation counter bumped by
/// [`SessionResolver::reset`].
#[derive(Default)]
pub struct DefaultSessionResolver {
    generations: Mutex<HashMap<String, u32>>,
}

impl DefaultSessionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_for(base: String, generation: u32) -> String {
        if generation == 0 {
            base
        } else {
            format!("{base}#{generation}")
        }
    }
}

impl SessionResolver for DefaultSessionResolver {
    fn resolve(&self, target: &ChannelReplyTarget) -> String {
        let base = default_channel_session_key(target);
        let generation = {
            let map = self.generations.lock().unwrap_or_else(|e| e.into_inner());
            map.get(&base).copied().unwrap_or(0)
        };
        Self::key_for(base, generation)
    }

    fn reset(&self, target: &ChannelReplyTarget) -> String {
        let base = default_channel_session_key(target);
        let generation = {
            let mut map = self.generations.lock().unwrap_or_else(|e| e.into_inner());
            let generation = map.entry(base.clone()).or_insert(0);
            *generation += 1;
            *generation
        };
        Self::key_for(base, generation)
    }
}
