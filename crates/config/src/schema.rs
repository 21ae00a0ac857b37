/// Config schema types (messages, channels, agent, storage).
use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Default debounce window for inbound messages.
pub const DEFAULT_INBOUND_DEBOUNCE_MS: u64 = 1_500;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub messages: MessagesConfig,
    pub channels: ChannelsConfig,
    pub agent: AgentConfig,
    /// Directory for the SQLite database. Defaults to the platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Message handling settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    pub inbound: InboundDebounceConfig,
}

/// Inbound coalescing window, globally and per channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundDebounceConfig {
    /// Window in milliseconds. `0` disables coalescing.
    pub debounce_ms: u64,
    /// Per-channel overrides keyed by channel id (e.g. `sms`).
    pub by_channel: HashMap<String, u64>,
}

impl Default for InboundDebounceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_INBOUND_DEBOUNCE_MS,
            by_channel: HashMap::new(),
        }
    }
}

impl InboundDebounceConfig {
    /// Resolve the debounce window for `channel`.
    pub fn window_for(&self, channel: &str) -> Duration {
        let ms = self
            .by_channel
            .get(channel)
            .copied()
            .unwrap_or(self.debounce_ms);
        Duration::from_millis(ms)
    }
}

/// Channel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// SMS accounts, keyed by account ID. Parsed by the SMS plugin.
    #[serde(default)]
    pub sms: HashMap<String, serde_json::Value>,
}

/// Where authorized inbound messages are sent for an agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// HTTP endpoint receiving inbound envelopes. When unset, messages are
    /// only logged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Request timeout for the agent endpoint.
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 120,
        }
    }
}
