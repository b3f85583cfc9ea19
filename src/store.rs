//! Credential snapshot persistence
//!
//! Stores the cookie set captured after a successful WhatsApp Web
//! authentication so later runs can skip the QR pairing step. A deployment
//! that prefers to always re-pair simply runs without a store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Fixed row key: the relay keeps a single shared credential snapshot.
const SNAPSHOT_ID: &str = "whatsapp-session";

/// SQL schema for initialization
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS credential_snapshots (
    id TEXT PRIMARY KEY,
    cookies TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("snapshot encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One browser cookie, serialized the way the DevTools protocol reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix timestamp in seconds; -1 marks a session cookie.
    pub expires: f64,
    pub http_only: bool,
    pub secure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// Serialized authentication state captured from one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialSnapshot {
    pub cookies: Vec<StoredCookie>,
}

impl CredentialSnapshot {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// Thread-safe store handle
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    /// Open or create the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory store (for testing)
    #[allow(dead_code)] // Useful for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Load the persisted snapshot, if any
    pub fn load(&self) -> StoreResult<Option<CredentialSnapshot>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<String> = conn
            .query_row(
                "SELECT cookies FROM credential_snapshots WHERE id = ?1",
                params![SNAPSHOT_ID],
                |row| row.get(0),
            )
            .optional()?;
        row.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    /// Persist the snapshot, replacing any previous one
    pub fn save(&self, snapshot: &CredentialSnapshot) -> StoreResult<()> {
        let json = serde_json::to_string(snapshot)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO credential_snapshots (id, cookies, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET cookies = excluded.cookies, updated_at = excluded.updated_at",
            params![SNAPSHOT_ID, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
