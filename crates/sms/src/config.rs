use {
    courier_channels::gating::DmPolicy,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use crate::error::{Context, Error, Result};

/// Configuration for a single SMS account.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsAccountConfig {
    /// Base URL of the platform REST API, e.g. `https://api.example.com/v1`.
    pub api_base_url: String,

    /// Bearer token for the platform API.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,

    /// Shared secret for webhook signatures. When unset, requests are not
    /// authenticated.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_option_secret"
    )]
    pub webhook_secret: Option<Secret<String>>,

    /// Where the webhook listener binds.
    pub webhook: WebhookServerConfig,

    /// DM access policy.
    pub dm_policy: DmPolicy,

    /// Sender allowlist (phone numbers, emails or `*` globs).
    pub allow_from: Vec<String>,

    /// Mark conversations read before dispatching to the agent.
    pub send_read_receipts: bool,

    /// Show a typing indicator while the agent works.
    pub typing_indicator: bool,

    /// Thread replies under the inbound message they answer.
    pub reply_to_message: bool,

    /// Default model ID for this channel account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Bind address and path of the webhook listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests whose path does not start with this prefix get a 404.
    pub path: String,
}

impl Default for WebhookServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
            path: "/webhooks/sms".into(),
        }
    }
}

impl std::fmt::Debug for SmsAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsAccountConfig")
            .field("api_base_url", &self.api_base_url)
            .field("token", &"[REDACTED]")
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("webhook", &self.webhook)
            .field("dm_policy", &self.dm_policy)
            .field("allow_from", &self.allow_from)
            .field("send_read_receipts", &self.send_read_receipts)
            .field("typing_indicator", &self.typing_indicator)
            .field("reply_to_message", &self.reply_to_message)
            .field("model", &self.model)
            .finish()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

impl Default for SmsAccountConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            token: Secret::new(String::new()),
            webhook_secret: None,
            webhook: WebhookServerConfig::default(),
            dm_policy: DmPolicy::default(),
            allow_from: Vec::new(),
            send_read_receipts: true,
            typing_indicator: true,
            reply_to_message: false,
            model: None,
        }
    }
}

impl SmsAccountConfig {
    /// Parse an account entry from the `channels.sms` config table.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: Self =
            serde_json::from_value(value).context("invalid sms account config")?;
        if !config.webhook.path.starts_with('/') {
            return Err(Error::message(format!(
                "webhook.path must start with '/': {}",
                config.webhook.path
            )));
        }
        Ok(config)
    }

    /// Webhook secret, ignoring blank values.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .filter(|s| !s.trim().is_empty())
    }
}
