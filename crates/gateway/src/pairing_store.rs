use std::{path::Path, time::Duration};

use {
    async_trait::async_trait,
    courier_channels::{
        Error, Result,
        gating::normalize_sender_id,
        pairing::{
            PAIRING_REQUEST_TTL, PairingRequest, PairingStore, PairingUpsert,
            generate_pairing_code,
        },
    },
    courier_common::unix_now,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    },
};

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::external(context, e)
}

/// SQLite-backed pairing requests and allow-from list.
///
/// Rows are keyed by the normalized sender id so formatting variants of the
/// same phone number share one request and one allow-from entry.
pub struct SqlitePairingStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqlitePairingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            ttl: PAIRING_REQUEST_TTL,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Open (creating if needed) `courier.db` under `data_dir` and ensure
    /// the schema exists.
    pub async fn open(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let options = SqliteConnectOptions::new()
            .filename(data_dir.join("courier.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Create the pairing tables.
    pub async fn init(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pairing_requests (
                channel    TEXT    NOT NULL,
                sender_key TEXT    NOT NULL,
                sender_id  TEXT    NOT NULL,
                code       TEXT    NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (channel, sender_key)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS allow_from (
                channel    TEXT    NOT NULL,
                entry_key  TEXT    NOT NULL,
                entry      TEXT    NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (channel, entry_key)
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    fn cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(self.ttl.as_secs() as i64)
    }
}

#[async_trait]
impl PairingStore for SqlitePairingStore {
    async fn read_allow_from(&self, channel: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT entry FROM allow_from WHERE channel = ? ORDER BY created_at",
        )
        .bind(channel)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("read allow_from"))?;
        Ok(rows.into_iter().map(|(entry,)| entry).collect())
    }

    async fn upsert_pairing_request(
        &self,
        channel: &str,
        sender_id: &str,
    ) -> Result<PairingUpsert> {
        let now = unix_now();
        let key = normalize_sender_id(sender_id);

        sqlx::query(
            "DELETE FROM pairing_requests
             WHERE channel = ? AND sender_key = ? AND created_at <= ?",
        )
        .bind(channel)
        .bind(&key)
        .bind(self.cutoff(now))
        .execute(&self.pool)
        .await
        .map_err(db_err("expire pairing request"))?;

        // INSERT OR IGNORE keeps the first concurrent writer's code.
        let code = generate_pairing_code();
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO pairing_requests
             (channel, sender_key, sender_id, code, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(channel)
        .bind(&key)
        .bind(sender_id)
        .bind(&code)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err("insert pairing request"))?
        .rows_affected();

        if inserted == 1 {
            return Ok(PairingUpsert {
                code,
                created: true,
            });
        }

        let (existing,) = sqlx::query_as::<_, (String,)>(
            "SELECT code FROM pairing_requests WHERE channel = ? AND sender_key = ?",
        )
        .bind(channel)
        .bind(&key)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("read pairing request"))?;
        Ok(PairingUpsert {
            code: existing,
            created: false,
        })
    }

    async fn list_requests(&self, channel: &str) -> Result<Vec<PairingRequest>> {
        let rows = sqlx::query_as::<_, (String, String, String, i64)>(
            "SELECT channel, sender_id, code, created_at FROM pairing_requests
             WHERE channel = ? AND created_at > ?
             ORDER BY created_at",
        )
        .bind(channel)
        .bind(self.cutoff(unix_now()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list pairing requests"))?;

        Ok(rows
            .into_iter()
            .map(|r| PairingRequest {
                channel: r.0,
                sender_id: r.1,
                code: r.2,
                created_at: r.3,
            })
            .collect())
    }

    async fn approve(&self, channel: &str, code: &str) -> Result<Option<PairingRequest>> {
        let now = unix_now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("begin approve"))?;

        let row = sqlx::query_as::<_, (String, String, String, i64)>(
            "SELECT sender_key, sender_id, code, created_at FROM pairing_requests
             WHERE channel = ? AND code = ? COLLATE NOCASE AND created_at > ?",
        )
        .bind(channel)
        .bind(code.trim())
        .bind(self.cutoff(now))
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("find pairing request"))?;

        let Some((sender_key, sender_id, code, created_at)) = row else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM pairing_requests WHERE channel = ? AND sender_key = ?")
            .bind(channel)
            .bind(&sender_key)
            .execute(&mut *tx)
            .await
            .map_err(db_err("delete pairing request"))?;

        sqlx::query(
            "INSERT OR IGNORE INTO allow_from (channel, entry_key, entry, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(channel)
        .bind(&sender_key)
        .bind(&sender_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err("insert allow_from"))?;

        tx.commit().await.map_err(db_err("commit approve"))?;

        Ok(Some(PairingRequest {
            channel: channel.to_string(),
            sender_id,
            code,
            created_at,
        }))
    }

    async fn add_allow_from(&self, channel: &str, entry: &str) -> Result<()> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(Error::invalid_input("allow-from entry is empty"));
        }
        sqlx::query(
            "INSERT OR IGNORE INTO allow_from (channel, entry_key, entry, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(channel)
        .bind(normalize_sender_id(entry))
        .bind(entry)
        .bind(unix_now())
        .execute(&self.pool)
        .await
        .map_err(db_err("insert allow_from"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, courier_channels::gating::is_allowed};

    async fn store() -> SqlitePairingStore {
        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqlitePairingStore::init(&pool).await.unwrap();
        SqlitePairingStore::new(pool)
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_normalized_sender() {
        let store = store().await;
        let first = store
            .upsert_pairing_request("sms", "+1 (555) 123-4567")
            .await
            .unwrap();
        let second = store
            .upsert_pairing_request("sms", "+15551234567")
            .await
            .unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.code, second.code);

        let other_channel = store
            .upsert_pairing_request("other", "+15551234567")
            .await
            .unwrap();
        assert!(other_channel.created);
        assert_eq!(store.list_requests("sms").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_request_is_replaced() {
        let store = store().await.with_ttl(Duration::ZERO);
        let first = store.upsert_pairing_request("sms", "alice").await.unwrap();
        let second = store.upsert_pairing_request("sms", "alice").await.unwrap();
        assert!(first.created);
        assert!(second.created);
        assert!(store.list_requests("sms").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn approve_moves_sender_to_allow_from() {
        let store = store().await;
        let upsert = store
            .upsert_pairing_request("sms", "+1 555 123 4567")
            .await
            .unwrap();

        let approved = store
            .approve("sms", &upsert.code.to_lowercase())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved.sender_id, "+1 555 123 4567");
        assert!(store.list_requests("sms").await.unwrap().is_empty());

        let allow = store.read_allow_from("sms").await.unwrap();
        assert!(is_allowed("+15551234567", &allow));

        // Codes are single use.
        assert!(store.approve("sms", &upsert.code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_code_approves_nothing() {
        let store = store().await;
        store.upsert_pairing_request("sms", "bob").await.unwrap();
        assert!(store.approve("sms", "ZZZZZZZZ").await.unwrap().is_none());
        assert!(store.read_allow_from("sms").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_allow_from_dedupes_and_rejects_blank() {
        let store = store().await;
        store.add_allow_from("sms", "+1 (555) 000-1111").await.unwrap();
        store.add_allow_from("sms", "+15550001111").await.unwrap();
        assert_eq!(store.read_allow_from("sms").await.unwrap(), vec![
            "+1 (555) 000-1111".to_string()
        ]);
        assert!(store.add_allow_from("sms", "  ").await.is_err());
    }

    #[tokio::test]
    async fn open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqlitePairingStore::open(dir.path()).await.unwrap();
        store.add_allow_from("sms", "carol").await.unwrap();
        assert!(dir.path().join("courier.db").exists());
    }
}
