//! Platform REST client and the [`ChannelOutbound`] adapter built on it.
//!
//! Only `send` is retried (on 429). Typing, read receipts and reactions are
//! best-effort and report success as a `bool`.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    reqwest::{Client, Method, StatusCode, header::HeaderMap},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use {courier_channels::plugin::ChannelOutbound, courier_common::types::ReplyPayload};

use crate::{
    config::SmsAccountConfig,
    error::{Error, Result},
    state::AccountStateMap,
};

/// Placeholder id reported when the platform accepted a send without
/// returning a message id.
pub const UNKNOWN_MESSAGE_ID: &str = "unknown";

/// Provider error bodies are cut to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// How rate-limited (429) sends are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay for the first retry when no `Retry-After` is given. Doubles on
    /// each further retry.
    pub base_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0-based).
    pub fn delay(&self, headers: &HeaderMap, attempt: u32) -> Duration {
        let wait = retry_after_from_headers(headers)
            .unwrap_or_else(|| self.base_delay.saturating_mul(2u32.saturating_pow(attempt)));
        wait.min(self.max_delay)
    }
}

/// Positive `Retry-After` delta-seconds. HTTP dates are ignored; values too
/// large for a `Duration` saturate.
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?;
    let seconds = value.to_str().ok()?.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
}

/// Extra fields for [`SmsClient::send`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub media_url: Option<String>,
    pub media_mime_type: Option<String>,
    /// Platform message id to reply to.
    pub reply_to: Option<String>,
}

/// Identifiers of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResult {
    pub message_id: String,
    pub conversation_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
}

/// REST client for one SMS account.
pub struct SmsClient {
    http: Client,
    base_url: String,
    token: Secret<String>,
    retry: RetryPolicy,
}

impl SmsClient {
    pub fn new(http: Client, base_url: impl Into<String>, token: Secret<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(http: Client, config: &SmsAccountConfig) -> Self {
        Self::new(http, config.api_base_url.clone(), config.token.clone())
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn credentials(&self) -> Result<&str> {
        if self.base_url.is_empty() {
            return Err(Error::not_configured("api_base_url is empty"));
        }
        let token = self.token.expose_secret();
        if token.trim().is_empty() {
            return Err(Error::not_configured("api token is empty"));
        }
        Ok(token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send a text and/or media message to a conversation.
    ///
    /// Text is trimmed; a message with no text and no media url is rejected
    /// before any request is made. 429 responses are retried per the
    /// client's [`RetryPolicy`].
    pub async fn send(
        &self,
        conversation_id: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<SendResult> {
        let text = text.trim();
        let media_url = options
            .media_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());
        if text.is_empty() && media_url.is_none() {
            return Err(Error::NothingToSend);
        }
        let token = self.credentials()?;

        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(serde_json::json!({ "kind": "text", "value": text }));
        }
        if let Some(url) = media_url {
            let mut media = serde_json::json!({ "kind": "media", "url": url });
            if let Some(mime) = options.media_mime_type.as_deref().filter(|m| !m.is_empty()) {
                media["mimeType"] = mime.into();
            }
            parts.push(media);
        }
        let mut body = serde_json::json!({ "parts": parts });
        if let Some(reply_to) = options.reply_to.as_deref().filter(|r| !r.is_empty()) {
            body["replyTo"] = serde_json::json!({ "messageId": reply_to });
        }

        let url = self.url(&format!(
            "/chats/{}/messages",
            urlencoding::encode(conversation_id)
        ));
        let response = self
            .send_with_retry(conversation_id, || {
                self.http.post(&url).bearer_auth(token).json(&body)
            })
            .await?;

        let status = response.status();
        let raw = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Provider {
                status: status.as_u16(),
                body: raw.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed: SendResponse = serde_json::from_str(&raw).unwrap_or_default();
        let result = SendResult {
            message_id: parsed
                .message_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| UNKNOWN_MESSAGE_ID.to_string()),
            conversation_id: parsed
                .conversation_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| conversation_id.to_string()),
        };
        debug!(
            conversation_id,
            message_id = %result.message_id,
            "sms message sent"
        );
        Ok(result)
    }

    async fn send_with_retry<F>(
        &self,
        conversation_id: &str,
        mut request: F,
    ) -> Result<reqwest::Response>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut retries = 0u32;

        loop {
            let response = request().send().await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            if retries >= self.retry.max_retries {
                warn!(
                    conversation_id,
                    retries,
                    max_retries = self.retry.max_retries,
                    "sms rate limit persisted after retries"
                );
                return Ok(response);
            }

            let wait = self.retry.delay(response.headers(), retries);
            retries += 1;
            warn!(
                conversation_id,
                retries,
                max_retries = self.retry.max_retries,
                wait_ms = wait.as_millis() as u64,
                "sms rate limited, waiting before retry"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Show the typing indicator. Best effort.
    pub async fn start_typing(&self, conversation_id: &str) -> bool {
        let path = format!("/chats/{}/typing", urlencoding::encode(conversation_id));
        self.best_effort("start_typing", Method::POST, &path, None)
            .await
    }

    /// Hide the typing indicator. Best effort.
    pub async fn stop_typing(&self, conversation_id: &str) -> bool {
        let path = format!("/chats/{}/typing", urlencoding::encode(conversation_id));
        self.best_effort("stop_typing", Method::DELETE, &path, None)
            .await
    }

    /// Mark the conversation as read. Best effort.
    pub async fn mark_as_read(&self, conversation_id: &str) -> bool {
        let path = format!("/chats/{}/read", urlencoding::encode(conversation_id));
        self.best_effort("mark_as_read", Method::POST, &path, None)
            .await
    }

    /// React to a message. Best effort.
    pub async fn send_reaction(&self, message_id: &str, reaction: &str) -> bool {
        let path = format!("/messages/{}/reactions", urlencoding::encode(message_id));
        let body = serde_json::json!({ "reaction": reaction });
        self.best_effort("send_reaction", Method::POST, &path, Some(body))
            .await
    }

    /// Single attempt; any failure is logged and reported as `false`.
    async fn best_effort(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> bool {
        let token = match self.credentials() {
            Ok(token) => token,
            Err(e) => {
                debug!(operation, "skipping sms call: {e}");
                return false;
            },
        };
        let mut request = self.http.request(method, self.url(path)).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(operation, status = %response.status(), "sms call rejected");
                false
            },
            Err(e) => {
                debug!(operation, "sms call failed: {e}");
                false
            },
        }
    }
}

/// [`ChannelOutbound`] over the running SMS accounts.
#[derive(Clone)]
pub struct SmsOutbound {
    pub(crate) accounts: AccountStateMap,
}

impl SmsOutbound {
    fn client(&self, account_id: &str) -> anyhow::Result<(Arc<SmsClient>, bool)> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts
            .get(account_id)
            .map(|s| (Arc::clone(&s.client), s.config.reply_to_message))
            .ok_or_else(|| courier_channels::Error::unknown_account(account_id).into())
    }
}

#[async_trait]
impl ChannelOutbound for SmsOutbound {
    async fn send_text(
        &self,
        account_id: &str,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> anyhow::Result<()> {
        let (client, threaded) = self.client(account_id)?;
        let options = SendOptions {
            reply_to: reply_to.filter(|_| threaded).map(str::to_string),
            ..Default::default()
        };
        client.send(to, text, &options).await?;
        Ok(())
    }

    async fn send_media(
        &self,
        account_id: &str,
        to: &str,
        payload: &ReplyPayload,
    ) -> anyhow::Result<()> {
        let (client, threaded) = self.client(account_id)?;
        let options = SendOptions {
            media_url: payload.media.as_ref().map(|m| m.url.clone()),
            media_mime_type: payload.media.as_ref().map(|m| m.mime_type.clone()),
            reply_to: payload.reply_to_id.clone().filter(|_| threaded),
        };
        client.send(to, &payload.text, &options).await?;
        Ok(())
    }

    async fn send_typing(&self, account_id: &str, to: &str) -> anyhow::Result<()> {
        let (client, _) = self.client(account_id)?;
        client.start_typing(to).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{
            Json, Router,
            extract::{Path, State},
            http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus},
            response::IntoResponse,
            routing::post,
        },
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        tokio::sync::oneshot,
    };

    #[derive(Clone, Default)]
    struct MockApi {
        bodies: Arc<Mutex<Vec<serde_json::Value>>>,
        auth: Arc<Mutex<Vec<String>>>,
        calls: Arc<AtomicUsize>,
        /// Number of leading requests answered with 429.
        rate_limit_first: usize,
        retry_after: Option<&'static str>,
        response: Option<serde_json::Value>,
        fail_status: Option<u16>,
    }

    async fn send_handler(
        State(api): State<MockApi>,
        Path(chat): Path<String>,
        headers: AxumHeaders,
        Json(body): Json<serde_json::Value>,
    ) -> axum::response::Response {
        let n = api.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            api.auth.lock().unwrap().push(value.to_string());
        }
        api.bodies
            .lock()
            .unwrap()
            .push(serde_json::json!({ "chat": chat, "body": body }));
        if n < api.rate_limit_first {
            let mut response = (AxumStatus::TOO_MANY_REQUESTS, "slow down").into_response();
            if let Some(retry_after) = api.retry_after {
                response
                    .headers_mut()
                    .insert("retry-after", retry_after.parse().unwrap());
            }
            return response;
        }
        if let Some(status) = api.fail_status {
            return (
                AxumStatus::from_u16(status).unwrap(),
                "x".repeat(500),
            )
                .into_response();
        }
        match &api.response {
            Some(value) => Json(value.clone()).into_response(),
            None => AxumStatus::OK.into_response(),
        }
    }

    async fn ok_handler(State(api): State<MockApi>) -> AxumStatus {
        api.calls.fetch_add(1, Ordering::SeqCst);
        AxumStatus::NO_CONTENT
    }

    async fn start_mock(api: MockApi) -> (String, oneshot::Sender<()>) {
        let app = Router::new()
            .route("/chats/{chat}/messages", post(send_handler))
            .route("/chats/{chat}/typing", post(ok_handler).delete(ok_handler))
            .route("/chats/{chat}/read", post(ok_handler))
            .with_state(api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });
        (format!("http://{addr}"), shutdown_tx)
    }

    fn client(base_url: &str) -> SmsClient {
        SmsClient::new(Client::new(), base_url, Secret::new("tok".into()))
    }

    #[tokio::test]
    async fn send_posts_parts_with_bearer_auth() {
        let api = MockApi {
            response: Some(serde_json::json!({ "messageId": "m-42", "conversationId": "conv-9" })),
            ..Default::default()
        };
        let (base, shutdown) = start_mock(api.clone()).await;

        let result = client(&base)
            .send("conv 1", "  hello  ", &SendOptions {
                media_url: Some("https://cdn.example.com/a.png".into()),
                media_mime_type: Some("image/png".into()),
                reply_to: Some("m-1".into()),
            })
            .await
            .unwrap();

        assert_eq!(result, SendResult {
            message_id: "m-42".into(),
            conversation_id: "conv-9".into(),
        });
        let bodies = api.bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["chat"], "conv 1");
        let body = &bodies[0]["body"];
        assert_eq!(body["parts"][0], serde_json::json!({ "kind": "text", "value": "hello" }));
        assert_eq!(body["parts"][1]["mimeType"], "image/png");
        assert_eq!(body["replyTo"]["messageId"], "m-1");
        assert_eq!(api.auth.lock().unwrap()[0], "Bearer tok");
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn missing_ids_fall_back() {
        let (base, shutdown) = start_mock(MockApi::default()).await;
        let result = client(&base)
            .send("conv-1", "hi", &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(result.message_id, UNKNOWN_MESSAGE_ID);
        assert_eq!(result.conversation_id, "conv-1");
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_request() {
        let api = MockApi::default();
        let (base, shutdown) = start_mock(api.clone()).await;
        let err = client(&base)
            .send("conv-1", "   ", &SendOptions {
                media_url: Some(" ".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NothingToSend));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn missing_token_is_not_configured() {
        let client = SmsClient::new(Client::new(), "http://127.0.0.1:9", Secret::new(String::new()));
        let err = client
            .send("conv-1", "hi", &SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured { .. }));
    }

    #[tokio::test]
    async fn rate_limit_retry_honors_retry_after() {
        let api = MockApi {
            rate_limit_first: 1,
            retry_after: Some("1"),
            ..Default::default()
        };
        let (base, shutdown) = start_mock(api.clone()).await;

        let started = std::time::Instant::now();
        let result = client(&base)
            .send("conv-1", "hi", &SendOptions::default())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result.message_id, UNKNOWN_MESSAGE_ID);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert!(elapsed >= Duration::from_secs(1), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "waited {elapsed:?}");
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn persistent_rate_limit_surfaces_provider_error() {
        let api = MockApi {
            rate_limit_first: usize::MAX,
            ..Default::default()
        };
        let (base, shutdown) = start_mock(api.clone()).await;
        let client = client(&base).with_retry_policy(RetryPolicy {
            base_delay: Duration::from_millis(10),
            ..Default::default()
        });

        let err = client
            .send("conv-1", "hi", &SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { status: 429, .. }));
        // initial attempt + max_retries
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn provider_error_body_is_truncated() {
        let api = MockApi {
            fail_status: Some(500),
            ..Default::default()
        };
        let (base, shutdown) = start_mock(api).await;
        let err = client(&base)
            .send("conv-1", "hi", &SendOptions::default())
            .await
            .unwrap_err();
        match err {
            Error::Provider { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.chars().count(), 200);
            },
            other => panic!("unexpected {other:?}"),
        }
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn best_effort_calls_report_success_and_failure() {
        let api = MockApi::default();
        let (base, shutdown) = start_mock(api.clone()).await;
        let client = client(&base);

        assert!(client.start_typing("conv-1").await);
        assert!(client.stop_typing("conv-1").await);
        assert!(client.mark_as_read("conv-1").await);
        // No reactions route on the mock: 404 maps to false.
        assert!(!client.send_reaction("m-1", "love").await);
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);

        let unreachable =
            SmsClient::new(Client::new(), "http://127.0.0.1:9", Secret::new("tok".into()));
        assert!(!unreachable.mark_as_read("conv-1").await);
        let _ = shutdown.send(());
    }

    #[test]
    fn retry_delay_prefers_header_and_caps() {
        let policy = RetryPolicy::default();
        let mut headers = HeaderMap::new();
        assert_eq!(policy.delay(&headers, 0), Duration::from_millis(500));
        assert_eq!(policy.delay(&headers, 1), Duration::from_secs(1));
        assert_eq!(policy.delay(&headers, 10), Duration::from_secs(10));

        headers.insert(reqwest::header::RETRY_AFTER, "3".parse().unwrap());
        assert_eq!(policy.delay(&headers, 1), Duration::from_secs(3));
        headers.insert(reqwest::header::RETRY_AFTER, "120".parse().unwrap());
        assert_eq!(policy.delay(&headers, 0), Duration::from_secs(10));
        headers.insert(reqwest::header::RETRY_AFTER, "0".parse().unwrap());
        assert_eq!(policy.delay(&headers, 0), Duration::from_millis(500));

        headers.insert(reqwest::header::RETRY_AFTER, "1e20".parse().unwrap());
        assert_eq!(policy.delay(&headers, 0), Duration::from_secs(10));
        headers.insert(reqwest::header::RETRY_AFTER, "1.5".parse().unwrap());
        assert_eq!(policy.delay(&headers, 0), Duration::from_millis(1500));
        headers.insert(reqwest::header::RETRY_AFTER, "inf".parse().unwrap());
        assert_eq!(policy.delay(&headers, 0), Duration::from_millis(500));
    }
}
