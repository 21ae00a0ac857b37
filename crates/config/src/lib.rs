//! Configuration loading and env substitution.
//!
//! Config files: `courier.toml`, `courier.yaml`, or `courier.json`
//! Searched in `./` then `~/.config/courier/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir_default, data_dir, discover_and_load, load_config},
    schema::{
        AgentConfig, ChannelsConfig, CourierConfig, DEFAULT_INBOUND_DEBOUNCE_MS,
        InboundDebounceConfig, MessagesConfig,
    },
};
