//! SMS channel plugin for courier.
//!
//! Receives platform events on a signed webhook, coalesces message bursts,
//! gates senders through DM policy and pairing, and sends replies through
//! the platform's REST API.

pub mod access;
pub mod config;
pub mod error;
pub mod event;
pub mod inbound;
pub mod outbound;
pub mod plugin;
pub mod server;
pub mod signature;
pub mod state;

#[cfg(test)]
mod test_support;

/// Channel id used in debounce keys and the pairing store.
pub const CHANNEL_ID: &str = "sms";

pub use {
    config::SmsAccountConfig,
    error::{Error, Result},
    outbound::{SendOptions, SendResult, SmsClient},
    plugin::SmsPlugin,
};
