//! Pairing codes for senders that are not on an allowlist.
//!
//! An unknown sender is issued a short code once. An operator approves the
//! code out-of-band, which moves the sender into the persisted allow-from
//! store; from then on the sender passes the allowlist check.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {async_trait::async_trait, courier_common::unix_now, rand::Rng, serde::Serialize};

use crate::{Error, Result, gating::normalize_sender_id};

/// Length of an issued pairing code.
pub const PAIRING_CODE_LENGTH: usize = 8;

/// Uppercase alphabet without look-alike characters (no 0/O, 1/I).
const PAIRING_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// How long an unapproved pairing request stays valid.
pub const PAIRING_REQUEST_TTL: Duration = Duration::from_secs(60 * 60);

/// A pending pairing request for one sender on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingRequest {
    pub channel: String,
    pub sender_id: String,
    pub code: String,
    /// Unix seconds.
    pub created_at: i64,
}

/// Result of [`PairingStore::upsert_pairing_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUpsert {
    pub code: String,
    /// True only when this call inserted the request.
    pub created: bool,
}

/// Persistence for pairing requests and the approved allow-from list.
///
/// The authorization path only reads the allow-from list and upserts
/// requests; `approve` and `add_allow_from` belong to the approval side.
#[async_trait]
pub trait PairingStore: Send + Sync {
    /// Approved sender identifiers for `channel`.
    async fn read_allow_from(&self, channel: &str) -> Result<Vec<String>>;

    /// Return the live request for `(channel, sender_id)`, creating one if
    /// there is none or the previous one expired.
    async fn upsert_pairing_request(&self, channel: &str, sender_id: &str)
    -> Result<PairingUpsert>;

    /// Live (unexpired) requests for `channel`.
    async fn list_requests(&self, channel: &str) -> Result<Vec<PairingRequest>>;

    /// Resolve `code`: drop the request and add its sender to the allow-from
    /// list. Returns `None` when no live request carries that code.
    async fn approve(&self, channel: &str, code: &str) -> Result<Option<PairingRequest>>;

    /// Add an entry to the allow-from list directly.
    async fn add_allow_from(&self, channel: &str, entry: &str) -> Result<()>;
}

/// Generate a random pairing code.
pub fn generate_pairing_code() -> String {
    let mut rng = rand::rng();
    (0..PAIRING_CODE_LENGTH)
        .map(|_| PAIRING_CODE_ALPHABET[rng.random_range(0..PAIRING_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Text sent to an unknown sender the first time they write in.
pub fn build_pairing_reply(channel: &str, sender_id: &str, code: &str) -> String {
    format!(
        "Courier: access not configured.\n\n\
         Your {channel} id: {sender_id}\n\n\
         Pairing code: {code}\n\n\
         Ask the bot owner to approve with:\n\
         courier pairing approve --channel {channel} {code}"
    )
}

fn is_live(created_at: i64, now: i64, ttl: Duration) -> bool {
    now.saturating_sub(created_at) < ttl.as_secs() as i64
}

#[derive(Default)]
struct InMemoryState {
    /// channel -> normalized sender -> request
    requests: HashMap<String, HashMap<String, PairingRequest>>,
    allow_from: HashMap<String, Vec<String>>,
}

/// Process-local pairing store. Approvals are lost on restart.
pub struct InMemoryPairingStore {
    state: Mutex<InMemoryState>,
    ttl: Duration,
    reads: AtomicUsize,
    fail: bool,
}

impl Default for InMemoryPairingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPairingStore {
    pub fn new() -> Self {
        Self::with_ttl(PAIRING_REQUEST_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(InMemoryState::default()),
            ttl,
            reads: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// A store whose every operation errors.
    #[cfg(test)]
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Number of `read_allow_from` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            Err(Error::unavailable("pairing store offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PairingStore for InMemoryPairingStore {
    async fn read_allow_from(&self, channel: &str) -> Result<Vec<String>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check()?;
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.allow_from.get(channel).cloned().unwrap_or_default())
    }

    async fn upsert_pairing_request(
        &self,
        channel: &str,
        sender_id: &str,
    ) -> Result<PairingUpsert> {
        self.check()?;
        let now = unix_now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let requests = state.requests.entry(channel.to_string()).or_default();
        requests.retain(|_, r| is_live(r.created_at, now, self.ttl));
        let key = normalize_sender_id(sender_id);
        if let Some(existing) = requests.get(&key)
            && is_live(existing.created_at, now, self.ttl)
        {
            return Ok(PairingUpsert {
                code: existing.code.clone(),
                created: false,
            });
        }

        let code = generate_pairing_code();
        requests.insert(key, PairingRequest {
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            code: code.clone(),
            created_at: now,
        });
        Ok(PairingUpsert {
            code,
            created: true,
        })
    }

    async fn list_requests(&self, channel: &str) -> Result<Vec<PairingRequest>> {
        self.check()?;
        let now = unix_now();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut live: Vec<PairingRequest> = state
            .requests
            .get(channel)
            .map(|requests| {
                requests
                    .values()
                    .filter(|r| is_live(r.created_at, now, self.ttl))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        live.sort_by_key(|r| r.created_at);
        Ok(live)
    }

    async fn approve(&self, channel: &str, code: &str) -> Result<Option<PairingRequest>> {
        self.check()?;
        let now = unix_now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(requests) = state.requests.get_mut(channel) else {
            return Ok(None);
        };
        let Some(key) = requests
            .iter()
            .find(|(_, r)| r.code.eq_ignore_ascii_case(code.trim()))
            .map(|(k, _)| k.clone())
        else {
            return Ok(None);
        };
        let Some(request) = requests.remove(&key) else {
            return Ok(None);
        };
        if !is_live(request.created_at, now, self.ttl) {
            return Ok(None);
        }
        let allow = state.allow_from.entry(channel.to_string()).or_default();
        if !allow.iter().any(|e| normalize_sender_id(e) == key) {
            allow.push(request.sender_id.clone());
        }
        Ok(Some(request))
    }

    async fn add_allow_from(&self, channel: &str, entry: &str) -> Result<()> {
        self.check()?;
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(Error::invalid_input("allow-from entry is empty"));
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let allow = state.allow_from.entry(channel.to_string()).or_default();
        let normalized = normalize_sender_id(entry);
        if !allow.iter().any(|e| normalize_sender_id(e) == normalized) {
            allow.push(entry.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_code_uses_unambiguous_alphabet() {
        for _ in 0..100 {
            let code = generate_pairing_code();
            assert_eq!(code.len(), PAIRING_CODE_LENGTH);
            assert!(code.bytes().all(|b| PAIRING_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn pairing_reply_contains_sender_and_code() {
        let reply = build_pairing_reply("sms", "+15551234567", "ABCD2345");
        assert!(reply.contains("+15551234567"));
        assert!(reply.contains("ABCD2345"));
        assert!(reply.contains("courier pairing approve --channel sms ABCD2345"));
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_sender() {
        let store = InMemoryPairingStore::new();
        let first = store.upsert_pairing_request("sms", "+15551234567").await.unwrap();
        let again = store
            .upsert_pairing_request("sms", "+1 (555) 123-4567")
            .await
            .unwrap();
        assert!(first.created);
        assert!(!again.created);
        assert_eq!(first.code, again.code);
    }

    #[tokio::test]
    async fn requests_are_scoped_by_channel() {
        let store = InMemoryPairingStore::new();
        let sms = store.upsert_pairing_request("sms", "+1555").await.unwrap();
        let other = store.upsert_pairing_request("other", "+1555").await.unwrap();
        assert!(sms.created);
        assert!(other.created);
    }

    #[tokio::test]
    async fn expired_request_is_reissued() {
        let store = InMemoryPairingStore::with_ttl(Duration::ZERO);
        let first = store.upsert_pairing_request("sms", "+1555").await.unwrap();
        let second = store.upsert_pairing_request("sms", "+1555").await.unwrap();
        assert!(first.created);
        assert!(second.created);
        assert!(store.list_requests("sms").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_prunes_expired_requests_from_other_senders() {
        let store = InMemoryPairingStore::with_ttl(Duration::ZERO);
        store.upsert_pairing_request("sms", "+1555").await.unwrap();
        store.upsert_pairing_request("sms", "+1666").await.unwrap();
        store.upsert_pairing_request("sms", "+1777").await.unwrap();

        let state = store.state.lock().unwrap();
        let held: Vec<&str> = state.requests["sms"]
            .values()
            .map(|r| r.sender_id.as_str())
            .collect();
        assert_eq!(held, vec!["+1777"]);
    }

    #[tokio::test]
    async fn approve_moves_sender_to_allow_from() {
        let store = InMemoryPairingStore::new();
        let upsert = store.upsert_pairing_request("sms", "+15551234567").await.unwrap();

        let approved = store
            .approve("sms", &upsert.code.to_lowercase())
            .await
            .unwrap()
            .expect("request approved");
        assert_eq!(approved.sender_id, "+15551234567");
        assert_eq!(store.read_allow_from("sms").await.unwrap(), vec![
            "+15551234567".to_string()
        ]);
        assert!(store.list_requests("sms").await.unwrap().is_empty());
        assert!(store.approve("sms", &upsert.code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn approve_unknown_code_is_none() {
        let store = InMemoryPairingStore::new();
        assert!(store.approve("sms", "NOPE2345").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_allow_from_rejects_blank_and_dedupes() {
        let store = InMemoryPairingStore::new();
        assert!(store.add_allow_from("sms", "  ").await.is_err());
        store.add_allow_from("sms", "+15551234567").await.unwrap();
        store.add_allow_from("sms", "+1 555 123 4567").await.unwrap();
        assert_eq!(store.read_allow_from("sms").await.unwrap().len(), 1);
    }
}
