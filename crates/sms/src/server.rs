//! Webhook ingress.
//!
//! Phase one runs inside the request: method and path check, bounded body
//! read, signature check, then an immediate `200 {"received":true}`. Phase
//! two (parse and route) runs on a detached task, so its failures never
//! reach the platform and a slow agent never delays the acknowledgement.

use std::{net::SocketAddr, sync::Arc};

use {
    async_trait::async_trait,
    axum::{
        Json, Router,
        body::Body,
        extract::{Request, State},
        http::{HeaderMap, Method, StatusCode, header},
        response::{IntoResponse, Response},
    },
    bytes::{Bytes, BytesMut},
    courier_common::unix_now,
    futures::StreamExt,
    tokio::net::TcpListener,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    event::InboundEvent,
    signature::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER},
};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Receives parsed events after the request was acknowledged.
#[async_trait]
pub trait WebhookEventHandler: Send + Sync {
    async fn handle_event(&self, event: InboundEvent);
}

/// Shared state of one account's webhook listener.
#[derive(Clone)]
pub struct WebhookState {
    pub account_id: String,
    /// Path prefix requests must match.
    pub path: String,
    /// Signature secret; `None` accepts unsigned requests.
    pub secret: Option<Arc<str>>,
    pub handler: Arc<dyn WebhookEventHandler>,
}

/// Router answering every path; unmatched requests get a 404 from the
/// handler itself so the prefix check stays in one place.
pub fn router(state: WebhookState) -> Router {
    Router::new().fallback(handle_webhook).with_state(state)
}

/// Bind the listener for `host:port`. Port `0` picks a free port.
pub async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind((host, port)).await
}

/// Serve until `cancel` fires. In-flight requests finish before returning.
pub async fn serve(
    listener: TcpListener,
    state: WebhookState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    let account_id = state.account_id.clone();
    info!(account_id = %account_id, %addr, path = %state.path, "sms webhook listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!(account_id = %account_id, %addr, "sms webhook stopped");
    Ok(())
}

enum BodyError {
    TooLarge,
    Read(axum::Error),
}

/// Read the body, giving up as soon as it exceeds `limit`.
async fn read_limited(body: Body, limit: usize) -> Result<Bytes, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Read)?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

async fn handle_webhook(State(state): State<WebhookState>, request: Request) -> Response {
    if request.method() != Method::POST || !request.uri().path().starts_with(&state.path) {
        debug!(
            account_id = %state.account_id,
            method = %request.method(),
            path = request.uri().path(),
            "sms webhook: no route"
        );
        return StatusCode::NOT_FOUND.into_response();
    }

    let declared_len = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > MAX_BODY_BYTES) {
        return payload_too_large(&state.account_id);
    }

    let (parts, body) = request.into_parts();
    let body = match read_limited(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(BodyError::TooLarge) => return payload_too_large(&state.account_id),
        Err(BodyError::Read(e)) => {
            warn!(account_id = %state.account_id, "sms webhook: failed to read body: {e}");
            return StatusCode::BAD_REQUEST.into_response();
        },
    };

    if let Some(secret) = state.secret.as_deref()
        && let Err(reason) = signature::authenticate(
            secret,
            header_str(&parts.headers, TIMESTAMP_HEADER),
            header_str(&parts.headers, SIGNATURE_HEADER),
            &body,
            unix_now(),
        )
    {
        warn!(account_id = %state.account_id, %reason, "sms webhook: rejected request");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let handler = Arc::clone(&state.handler);
    let account_id = state.account_id;
    tokio::spawn(async move {
        match InboundEvent::parse(&body) {
            Ok(event) => {
                debug!(
                    account_id = %account_id,
                    event_type = event.event_type(),
                    "sms webhook event"
                );
                handler.handle_event(event).await;
            },
            Err(e) => warn!(account_id = %account_id, "sms webhook: unparseable payload: {e}"),
        }
    });

    (StatusCode::OK, Json(serde_json::json!({ "received": true }))).into_response()
}

fn payload_too_large(account_id: &str) -> Response {
    warn!(account_id, limit = MAX_BODY_BYTES, "sms webhook: payload too large");
    (StatusCode::PAYLOAD_TOO_LARGE, [(header::CONNECTION, "close")]).into_response()
}
