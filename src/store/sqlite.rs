//! SQLite side-store.
//!
//! rusqlite with bundled SQLite. Calls run on the blocking pool via
//! `tokio::task::spawn_blocking`, sharing one connection behind a mutex.

use super::{InsertResult, SideMetadata, SideStore};
use crate::address::Address;
use crate::chain::TxHash;
use crate::digest::Fingerprint;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stamps (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    file_hash     TEXT    NOT NULL UNIQUE,
    owner_address TEXT    NOT NULL,
    file_name     TEXT    NOT NULL,
    file_size     INTEGER NOT NULL,
    timestamp     TEXT    NOT NULL,
    tx_id         TEXT,
    is_public     INTEGER NOT NULL,
    created_at    TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stamps_owner ON stamps (owner_address, created_at DESC);
";

const COLUMNS: &str =
    "file_hash, owner_address, file_name, file_size, timestamp, tx_id, is_public, created_at";

/// Persistent side-store backed by a SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SideStore`] if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!("Opening side-store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SideStore`] if the schema cannot be created.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| Error::SideStore(format!("spawn_blocking failed: {e}")))?
    }
}

/// Row as stored, before parsing back into domain types.
struct RawRow {
    file_hash: String,
    owner_address: String,
    file_name: String,
    file_size: i64,
    timestamp: String,
    tx_id: Option<String>,
    is_public: bool,
    created_at: String,
}

impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            file_hash: row.get(0)?,
            owner_address: row.get(1)?,
            file_name: row.get(2)?,
            file_size: row.get(3)?,
            timestamp: row.get(4)?,
            tx_id: row.get(5)?,
            is_public: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_metadata(self) -> Result<SideMetadata> {
        Ok(SideMetadata {
            fingerprint: self.file_hash.parse()?,
            owner: self.owner_address.parse()?,
            file_name: self.file_name,
            file_size: u64::try_from(self.file_size)
                .map_err(|_| Error::SideStore(format!("bad file_size {}", self.file_size)))?,
            timestamp: parse_time(&self.timestamp)?,
            tx_id: self.tx_id.as_deref().map(str::parse::<TxHash>).transpose()?,
            is_public: self.is_public,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::SideStore(format!("bad timestamp {s:?}: {e}")))
}

#[async_trait]
impl SideStore for SqliteStore {
    async fn insert(&self, metadata: &SideMetadata) -> Result<InsertResult> {
        let m = metadata.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                &format!(
                    "INSERT INTO stamps ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(file_hash) DO NOTHING"
                ),
                params![
                    m.fingerprint.to_hex(),
                    m.owner.to_checksum(),
                    m.file_name,
                    i64::try_from(m.file_size).unwrap_or(i64::MAX),
                    format_time(&m.timestamp),
                    m.tx_id.map(|h| h.to_string()),
                    m.is_public,
                    format_time(&m.created_at),
                ],
            )?;
            Ok(if changed == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<SideMetadata>> {
        let key = fingerprint.to_hex();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM stamps WHERE file_hash = ?1"),
                params![key],
                RawRow::read,
            )
            .optional()?
            .map(RawRow::into_metadata)
            .transpose()
        })
        .await
    }

    async fn list_by_owner(&self, owner: &Address) -> Result<Vec<SideMetadata>> {
        let key = owner.to_checksum();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM stamps WHERE owner_address = ?1
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map(params![key], RawRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(RawRow::into_metadata).collect()
        })
        .await
    }
}
