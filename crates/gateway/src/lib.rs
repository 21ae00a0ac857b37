//! Courier gateway: wires channel plugins to the agent backend.
//!
//! Owns the SQLite pairing store, session key resolution, envelope
//! formatting and the reply path back through each channel's outbound
//! adapter.

pub mod agent;
pub mod channel_events;
pub mod envelope;
pub mod pairing_store;
pub mod server;
pub mod session;

pub use {
    channel_events::GatewayChannelEventSink,
    pairing_store::SqlitePairingStore,
    server::{Gateway, run_until_shutdown},
};
