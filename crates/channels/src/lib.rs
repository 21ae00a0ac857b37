//! Channel plugin system.
//!
//! Each messaging platform implements the ChannelPlugin trait with adapters
//! for outbound messaging and status. Shared inbound machinery lives here
//! too: DM gating, pairing codes, and the per-conversation debouncer.

pub mod commands;
pub mod debounce;
pub mod error;
pub mod gating;
pub mod pairing;
pub mod plugin;

pub use {
    error::{Error, Result},
    plugin::{
        ChannelEvent, ChannelEventSink, ChannelHealthSnapshot, ChannelMessageKind,
        ChannelMessageMeta, ChannelOutbound, ChannelPlugin, ChannelReplyTarget, ChannelStatus,
        ChannelType,
    },
};
