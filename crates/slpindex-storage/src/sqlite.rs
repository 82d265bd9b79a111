//! SQLite storage backend for the SLP token index.
//!
//! Persists transaction records, token and graph documents, the block cursor
//! and recent block hashes to a single SQLite file. Records are stored as
//! JSON documents keyed by txid. Uses `sqlx` with WAL mode for concurrent
//! read performance.
//!
//! # Usage
//! ```rust,no_run
//! use slpindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./slpindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use slpindex_core::checkpoint::{ChainSyncCheckpoint, CheckpointStore};
use slpindex_core::error::StoreError;
use slpindex_core::store::SyncStore;
use slpindex_core::types::{TokenId, TxRecord};

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode(record: &TxRecord) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|e| StoreError::Backend(e.to_string()))
}

fn decode(doc: &str) -> Result<TxRecord, StoreError> {
    serde_json::from_str(doc).map_err(|e| StoreError::Backend(format!("corrupt record: {e}")))
}

fn parse_hash(s: &str) -> Result<BlockHash, StoreError> {
    BlockHash::from_str(s).map_err(|e| StoreError::Backend(format!("corrupt block hash {s}: {e}")))
}

/// SQLite-backed index storage.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./slpindex.db"`) or a full
    /// SQLite URL (`"sqlite:./slpindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(backend)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Limited to one connection, since every connection to `:memory:` is a
    /// separate database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(backend)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS unconfirmed (
                txid   TEXT PRIMARY KEY,
                record TEXT NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS confirmed (
                txid   TEXT    PRIMARY KEY,
                height INTEGER NOT NULL,
                record TEXT    NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_confirmed_height ON confirmed (height);",
            "CREATE TABLE IF NOT EXISTS tokens (
                token_id TEXT PRIMARY KEY,
                doc      TEXT NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS graphs (
                token_id TEXT PRIMARY KEY,
                doc      TEXT NOT NULL
            );",
            // single-row cursor
            "CREATE TABLE IF NOT EXISTS checkpoint (
                id     INTEGER PRIMARY KEY CHECK (id = 0),
                height INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS block_hashes (
                height INTEGER PRIMARY KEY,
                hash   TEXT    NOT NULL
            );",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        }
        Ok(())
    }

    // ─── Read side ──────────────────────────────────────────────────────────────

    pub async fn unconfirmed(&self, txid: &Txid) -> Result<Option<TxRecord>, StoreError> {
        let row = sqlx::query("SELECT record FROM unconfirmed WHERE txid = ?")
            .bind(txid.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| decode(&r.get::<String, _>("record"))).transpose()
    }

    /// Confirmed record and the height it was mined at.
    pub async fn confirmed(&self, txid: &Txid) -> Result<Option<(u64, TxRecord)>, StoreError> {
        let row = sqlx::query("SELECT height, record FROM confirmed WHERE txid = ?")
            .bind(txid.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| {
            let height = r.get::<i64, _>("height") as u64;
            decode(&r.get::<String, _>("record")).map(|record| (height, record))
        })
        .transpose()
    }

    /// Row counts for `(confirmed, unconfirmed)`.
    pub async fn counts(&self) -> Result<(u64, u64), StoreError> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM confirmed)   AS confirmed,
                    (SELECT COUNT(*) FROM unconfirmed) AS unconfirmed",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok((
            row.get::<i64, _>("confirmed") as u64,
            row.get::<i64, _>("unconfirmed") as u64,
        ))
    }

    // ─── Token documents ────────────────────────────────────────────────────────

    /// Upsert a token document (written by the token graph manager).
    pub async fn put_token(&self, token_id: &TokenId, doc: &serde_json::Value) -> Result<(), StoreError> {
        self.put_doc("tokens", token_id, doc).await
    }

    /// Upsert a serialized token graph.
    pub async fn put_graph(&self, token_id: &TokenId, doc: &serde_json::Value) -> Result<(), StoreError> {
        self.put_doc("graphs", token_id, doc).await
    }

    pub async fn token(&self, token_id: &TokenId) -> Result<Option<serde_json::Value>, StoreError> {
        self.get_doc("tokens", token_id).await
    }

    pub async fn graph(&self, token_id: &TokenId) -> Result<Option<serde_json::Value>, StoreError> {
        self.get_doc("graphs", token_id).await
    }

    async fn put_doc(&self, table: &str, token_id: &TokenId, doc: &serde_json::Value) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {table} (token_id, doc) VALUES (?, ?)"
        ))
        .bind(token_id.to_string())
        .bind(doc.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_doc(&self, table: &str, token_id: &TokenId) -> Result<Option<serde_json::Value>, StoreError> {
        let row = sqlx::query(&format!("SELECT doc FROM {table} WHERE token_id = ?"))
            .bind(token_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| {
            serde_json::from_str(&r.get::<String, _>("doc"))
                .map_err(|e| StoreError::Backend(format!("corrupt {table} document: {e}")))
        })
        .transpose()
    }

    async fn delete_doc(&self, table: &str, token_id: &TokenId) -> Result<(), StoreError> {
        sqlx::query(&format!("DELETE FROM {table} WHERE token_id = ?"))
            .bind(token_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

// ─── SyncStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl SyncStore for SqliteStore {
    async fn unconfirmed_insert(&self, record: &TxRecord) -> Result<(), StoreError> {
        let doc = encode(record)?;
        let result = sqlx::query("INSERT INTO unconfirmed (txid, record) VALUES (?, ?)")
            .bind(record.txid.to_string())
            .bind(&doc)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateKey(record.txid.to_string()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn unconfirmed_delete(&self, txids: &[Txid]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for txid in txids {
            sqlx::query("DELETE FROM unconfirmed WHERE txid = ?")
                .bind(txid.to_string())
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        debug!(count = txids.len(), "unconfirmed records deleted");
        Ok(())
    }

    async fn unconfirmed_txids(&self) -> Result<Vec<Txid>, StoreError> {
        let rows = sqlx::query("SELECT txid FROM unconfirmed")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(|r| {
                let s: String = r.get("txid");
                Txid::from_str(&s).map_err(|e| StoreError::Backend(format!("corrupt txid {s}: {e}")))
            })
            .collect()
    }

    async fn confirmed_replace(&self, records: Vec<TxRecord>, height: u64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for record in &records {
            sqlx::query("INSERT OR REPLACE INTO confirmed (txid, height, record) VALUES (?, ?, ?)")
                .bind(record.txid.to_string())
                .bind(height as i64)
                .bind(encode(record)?)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        debug!(height, count = records.len(), "confirmed records stored");
        Ok(())
    }

    async fn confirmed_delete(&self, txid: &Txid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM confirmed WHERE txid = ?")
            .bind(txid.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn confirmed_fetch_for_reorg(&self, height: u64) -> Result<Vec<TxRecord>, StoreError> {
        let rows = sqlx::query("SELECT record FROM confirmed WHERE height = ?")
            .bind(height as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(|r| decode(&r.get::<String, _>("record")))
            .collect()
    }

    async fn confirmed_delete_for_reorg(&self, height: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM confirmed WHERE height = ?")
            .bind(height as i64)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        debug!(height, "confirmed records rolled back");
        Ok(())
    }

    async fn token_delete(&self, token_id: &TokenId) -> Result<(), StoreError> {
        self.delete_doc("tokens", token_id).await
    }

    async fn graph_delete(&self, token_id: &TokenId) -> Result<(), StoreError> {
        self.delete_doc("graphs", token_id).await
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn load(&self) -> Result<Option<ChainSyncCheckpoint>, StoreError> {
        let row = sqlx::query(
            "SELECT c.height AS height, b.hash AS hash
             FROM checkpoint c LEFT JOIN block_hashes b ON b.height = c.height
             WHERE c.id = 0",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let height = row.get::<i64, _>("height") as u64;
        let hash = row
            .get::<Option<String>, _>("hash")
            .map(|s| parse_hash(&s))
            .transpose()?;
        Ok(Some(ChainSyncCheckpoint::new(height, hash)))
    }

    async fn save(&self, height: u64, hash: Option<BlockHash>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("INSERT OR REPLACE INTO checkpoint (id, height) VALUES (0, ?)")
            .bind(height as i64)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        match hash {
            Some(hash) => {
                sqlx::query("INSERT OR REPLACE INTO block_hashes (height, hash) VALUES (?, ?)")
                    .bind(height as i64)
                    .bind(hash.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
            }
            None => {
                sqlx::query("DELETE FROM block_hashes WHERE height = ?")
                    .bind(height as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
            }
        }
        tx.commit().await.map_err(backend)?;

        debug!(height, hash = ?hash, "checkpoint saved");
        Ok(())
    }

    async fn hash_at(&self, height: u64) -> Result<Option<BlockHash>, StoreError> {
        let row = sqlx::query("SELECT hash FROM block_hashes WHERE height = ?")
            .bind(height as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| parse_hash(&r.get::<String, _>("hash")))
            .transpose()
    }

    async fn delete_hash_at(&self, height: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM block_hashes WHERE height = ?")
            .bind(height as i64)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM checkpoint")
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM block_hashes")
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
