use {
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::pairing::PairingStore;

/// DM access policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    /// Anyone can DM the bot.
    Open,
    /// Allowlisted senders only; unknown senders are offered a pairing code.
    #[default]
    #[serde(alias = "allowlist")]
    Pairing,
    /// DMs disabled.
    Disabled,
}

/// Where a sender currently stands with respect to the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderStatus {
    /// Not evaluated yet.
    #[default]
    Unknown,
    PairingPending,
    Authorized,
    Blocked,
}

/// Reason an inbound message was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDenied {
    DmsDisabled,
    /// The allow-from store could not be read, so access fails closed.
    StoreUnavailable,
}

impl std::fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DmsDisabled => write!(f, "DMs are disabled"),
            Self::StoreUnavailable => write!(f, "allow-from store unavailable"),
        }
    }
}

/// Outcome of gating one inbound sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Authorized,
    Blocked(AccessDenied),
    /// Sender is not allowlisted and holds a pairing code. `created` is true
    /// only when this call minted the code.
    PairingPending { code: String, created: bool },
}

impl AccessDecision {
    pub fn status(&self) -> SenderStatus {
        match self {
            Self::Authorized => SenderStatus::Authorized,
            Self::Blocked(_) => SenderStatus::Blocked,
            Self::PairingPending { .. } => SenderStatus::PairingPending,
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }
}

/// Normalize a sender identifier for allowlist comparison.
///
/// Lowercases and strips whitespace, parentheses, hyphens and dots so that
/// `"+1 (555) 123-4567"` and `"+15551234567"` compare equal.
pub fn normalize_sender_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '(' | ')' | '-' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Union of configured and stored allow-from entries: trimmed, non-empty,
/// first occurrence wins.
pub fn merge_allow_from(configured: &[String], stored: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    configured
        .iter()
        .chain(stored.iter())
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .filter(|entry| seen.insert(normalize_sender_id(entry)))
        .map(str::to_string)
        .collect()
}

/// Check if a sender is on the allowlist.
///
/// An empty allowlist denies everyone. Entries are normalized before
/// comparison and support glob-style `*` wildcards; a bare `*` admits all.
pub fn is_allowed(sender_id: &str, allowlist: &[String]) -> bool {
    let sender = normalize_sender_id(sender_id);
    if sender.is_empty() {
        return false;
    }
    allowlist.iter().any(|entry| {
        let pat = normalize_sender_id(entry);
        if pat.contains('*') {
            glob_match(&pat, &sender)
        } else {
            pat == sender
        }
    })
}

/// Simple glob matching supporting `*` as a wildcard for any sequence of chars.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            Some(idx) => {
                // First segment must match at start
                if i == 0 && idx != 0 {
                    return false;
                }
                pos += idx + part.len();
            },
            None => return false,
        }
    }
    // Last segment must match at end (unless pattern ends with *)
    if parts.last().is_some_and(|last| !last.is_empty()) {
        pos == text.len()
    } else {
        true
    }
}

/// Decide whether `sender_id` may reach the agent on `channel`.
///
/// `Open` and `Disabled` short-circuit before the store is touched. Under
/// `Pairing` the allow-from store is read on every call and merged with the
/// configured entries; unknown senders get a pairing request upserted.
pub async fn evaluate_dm_access(
    policy: DmPolicy,
    configured_allow_from: &[String],
    store: &dyn PairingStore,
    channel: &str,
    sender_id: &str,
) -> AccessDecision {
    match policy {
        DmPolicy::Disabled => return AccessDecision::Blocked(AccessDenied::DmsDisabled),
        DmPolicy::Open => return AccessDecision::Authorized,
        DmPolicy::Pairing => {},
    }

    let stored = match store.read_allow_from(channel).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(channel, sender_id, "failed to read allow-from store: {e}");
            return AccessDecision::Blocked(AccessDenied::StoreUnavailable);
        },
    };
    let merged = merge_allow_from(configured_allow_from, &stored);
    if is_allowed(sender_id, &merged) {
        return AccessDecision::Authorized;
    }

    match store.upsert_pairing_request(channel, sender_id).await {
        Ok(upsert) => {
            debug!(
                channel,
                sender_id,
                created = upsert.created,
                "sender requires pairing"
            );
            AccessDecision::PairingPending {
                code: upsert.code,
                created: upsert.created,
            }
        },
        Err(e) => {
            warn!(channel, sender_id, "failed to upsert pairing request: {e}");
            AccessDecision::Blocked(AccessDenied::StoreUnavailable)
        },
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::pairing::InMemoryPairingStore};

    #[test]
    fn empty_allowlist_denies_everyone() {
        assert!(!is_allowed("anyone", &[]));
    }

    #[test]
    fn wildcard_admits_everyone() {
        assert!(is_allowed("+15550000000", &["*".into()]));
    }

    #[test]
    fn phone_formatting_is_ignored() {
        let list = vec!["+15551234567".into()];
        assert!(is_allowed("+1 (555) 123-4567", &list));
        assert!(is_allowed("+1.555.123.4567", &list));
        assert!(!is_allowed("+1 (555) 123-4568", &list));
    }

    #[test]
    fn email_handles_match_case_insensitively() {
        let list = vec!["Alice@Example.com".into()];
        assert!(is_allowed("alice@example.com", &list));
    }

    #[test]
    fn glob_suffix() {
        let list = vec!["*@example.com".into()];
        assert!(is_allowed("user@example.com", &list));
        assert!(!is_allowed("user@other.com", &list));
    }

    #[test]
    fn glob_prefix() {
        let list = vec!["+1555*".into()];
        assert!(is_allowed("+1 555 000 1111", &list));
        assert!(!is_allowed("+44 20 7946 0000", &list));
    }

    #[test]
    fn merge_trims_and_deduplicates() {
        let merged = merge_allow_from(
            &[" +15551234567 ".into(), "".into(), "bob@example.com".into()],
            &["+1 (555) 123-4567".into(), "carol@example.com".into()],
        );
        assert_eq!(merged, vec![
            "+15551234567".to_string(),
            "bob@example.com".to_string(),
            "carol@example.com".to_string(),
        ]);
    }

    #[test]
    fn legacy_allowlist_policy_maps_to_pairing() {
        let policy: DmPolicy = serde_json::from_str("\"allowlist\"").unwrap();
        assert_eq!(policy, DmPolicy::Pairing);
        assert_eq!(DmPolicy::default(), DmPolicy::Pairing);
    }

    #[tokio::test]
    async fn open_policy_skips_store() {
        let store = InMemoryPairingStore::failing();
        let decision = evaluate_dm_access(DmPolicy::Open, &[], &store, "sms", "+1555").await;
        assert_eq!(decision, AccessDecision::Authorized);
        assert_eq!(store.read_count(), 0);
    }

    #[tokio::test]
    async fn disabled_policy_never_issues_pairing() {
        let store = InMemoryPairingStore::new();
        let decision = evaluate_dm_access(DmPolicy::Disabled, &[], &store, "sms", "+1555").await;
        assert_eq!(
            decision,
            AccessDecision::Blocked(AccessDenied::DmsDisabled)
        );
        assert!(store.list_requests("sms").await.unwrap().is_empty());
        assert_eq!(store.read_count(), 0);
    }

    #[tokio::test]
    async fn configured_entry_authorizes() {
        let store = InMemoryPairingStore::new();
        let decision = evaluate_dm_access(
            DmPolicy::Pairing,
            &["+15551234567".into()],
            &store,
            "sms",
            "+1 (555) 123-4567",
        )
        .await;
        assert!(decision.is_authorized());
    }

    #[tokio::test]
    async fn stored_entry_authorizes_without_config() {
        let store = InMemoryPairingStore::new();
        store.add_allow_from("sms", "+15551234567").await.unwrap();
        let decision =
            evaluate_dm_access(DmPolicy::Pairing, &[], &store, "sms", "+15551234567").await;
        assert!(decision.is_authorized());
    }

    #[tokio::test]
    async fn unknown_sender_gets_one_code() {
        let store = InMemoryPairingStore::new();
        let first = evaluate_dm_access(DmPolicy::Pairing, &[], &store, "sms", "+1999").await;
        let second = evaluate_dm_access(DmPolicy::Pairing, &[], &store, "sms", "+1999").await;

        let code = match first {
            AccessDecision::PairingPending {
                code,
                created: true,
            } => code,
            other => panic!("expected a created pairing request, got {other:?}"),
        };
        assert_eq!(second, AccessDecision::PairingPending {
            code,
            created: false,
        });
        assert_eq!(store.list_requests("sms").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let store = InMemoryPairingStore::failing();
        let decision = evaluate_dm_access(DmPolicy::Pairing, &[], &store, "sms", "+1999").await;
        assert_eq!(
            decision,
            AccessDecision::Blocked(AccessDenied::StoreUnavailable)
        );
        assert_eq!(decision.status(), SenderStatus::Blocked);
    }
}
