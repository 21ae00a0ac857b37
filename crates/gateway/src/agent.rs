//! Agent backends: where a formatted inbound message goes for a reply.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    async_trait::async_trait,
    courier_channels::{ChannelMessageMeta, ChannelReplyTarget},
    courier_common::types::ReplyPayload,
    courier_config::AgentConfig,
    serde::Deserialize,
    tracing::info,
};

/// One agent turn.
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub session_key: String,
    /// Formatted envelope text.
    pub envelope: String,
    pub reply_to: ChannelReplyTarget,
    pub meta: ChannelMessageMeta,
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Run a turn and return the replies to deliver, in order.
    async fn run_turn(&self, turn: &AgentTurn) -> anyhow::Result<Vec<ReplyPayload>>;

    /// Handle a slash command the gateway does not answer itself.
    async fn run_command(&self, _session_key: &str, command: &str) -> anyhow::Result<String> {
        let name = command.split_whitespace().next().unwrap_or(command);
        Ok(format!("/{name} is not supported here."))
    }
}

/// Logs envelopes and never replies.
#[derive(Debug, Default)]
pub struct LogOnlyAgent;

#[async_trait]
impl AgentBackend for LogOnlyAgent {
    async fn run_turn(&self, turn: &AgentTurn) -> anyhow::Result<Vec<ReplyPayload>> {
        info!(
            session_key = %turn.session_key,
            chat_id = %turn.reply_to.chat_id,
            envelope = %turn.envelope,
            "agent turn (no agent endpoint configured)"
        );
        Ok(Vec::new())
    }
}

#[derive(Debug, Default, Deserialize)]
struct AgentResponse {
    #[serde(default)]
    replies: Vec<ReplyPayload>,
    #[serde(default)]
    reply: Option<String>,
}

impl AgentResponse {
    fn into_replies(self) -> Vec<ReplyPayload> {
        let mut replies = self.replies;
        if let Some(text) = self.reply {
            replies.push(ReplyPayload::text(text));
        }
        replies.retain(|r| !r.is_empty());
        replies
    }
}

/// POSTs each turn as JSON to an HTTP endpoint.
///
/// The endpoint answers `{"replies": [{"text": ..., "media": ...}]}` or the
/// shorthand `{"reply": "..."}`.
pub struct HttpAgent {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpAgent {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    async fn post(&self, body: serde_json::Value) -> anyhow::Result<AgentResponse> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("agent endpoint {} unreachable", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("agent endpoint returned {status}");
        }
        let raw = response.text().await?;
        if raw.trim().is_empty() {
            return Ok(AgentResponse::default());
        }
        serde_json::from_str(&raw).context("invalid agent response")
    }
}

#[async_trait]
impl AgentBackend for HttpAgent {
    async fn run_turn(&self, turn: &AgentTurn) -> anyhow::Result<Vec<ReplyPayload>> {
        let response = self
            .post(serde_json::json!({
                "sessionKey": turn.session_key,
                "envelope": turn.envelope,
                "replyTo": turn.reply_to,
                "channel": turn.meta,
            }))
            .await?;
        Ok(response.into_replies())
    }

    async fn run_command(&self, session_key: &str, command: &str) -> anyhow::Result<String> {
        let response = self
            .post(serde_json::json!({
                "sessionKey": session_key,
                "command": command,
            }))
            .await?;
        Ok(response
            .into_replies()
            .into_iter()
            .map(|r| r.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// HTTP agent when `agent.endpoint` is set, otherwise log-only.
pub fn agent_from_config(config: &AgentConfig) -> anyhow::Result<Arc<dyn AgentBackend>> {
    match config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(endpoint) => Ok(Arc::new(HttpAgent::new(
            endpoint,
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Arc::new(LogOnlyAgent)),
    }
}
