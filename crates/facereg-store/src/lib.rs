//! facereg-store — SQLite-backed profile records and enrollment images.
//!
//! One database file holds both tables, keyed by identity key. Writes
//! overwrite any existing row for the key.

use chrono::Utc;
use facereg_core::{BlobStore, IdentityKey, ProfileRecord, ProfileStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS profiles (
    identity_key TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    domain       TEXT NOT NULL,
    age          TEXT NOT NULL,
    year         TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS images (
    identity_key TEXT PRIMARY KEY,
    content_type TEXT NOT NULL,
    bytes        BLOB NOT NULL,
    updated_at   TEXT NOT NULL
);
";

const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// A stored profile with its key, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredProfile {
    pub key: IdentityKey,
    pub record: ProfileRecord,
    pub updated_at: String,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(StoreError::backend)?;
        }
        let conn = Connection::open(path).map_err(StoreError::backend)?;
        tracing::info!(path = %path.display(), "opened profile store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(StoreError::backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(StoreError::backend)?;
        Ok(Self { conn })
    }

    /// All profiles, ordered by key.
    pub fn list_profiles(&self) -> Result<Vec<StoredProfile>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT identity_key, name, domain, age, year, updated_at
                 FROM profiles ORDER BY identity_key",
            )
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredProfile {
                    key: IdentityKey::from(row.get::<_, String>(0)?),
                    record: ProfileRecord {
                        name: row.get(1)?,
                        domain: row.get(2)?,
                        age: row.get(3)?,
                        year: row.get(4)?,
                    },
                    updated_at: row.get(5)?,
                })
            })
            .map_err(StoreError::backend)?;

        let profiles = rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::backend)?;
        Ok(profiles)
    }
}

impl ProfileStore for SqliteStore {
    fn get(&self, key: &IdentityKey) -> Result<Option<ProfileRecord>, StoreError> {
        self.conn
            .query_row(
                "SELECT name, domain, age, year FROM profiles WHERE identity_key = ?1",
                params![key.as_str()],
                |row| {
                    Ok(ProfileRecord {
                        name: row.get(0)?,
                        domain: row.get(1)?,
                        age: row.get(2)?,
                        year: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::backend)
    }

    fn put(&self, key: &IdentityKey, record: &ProfileRecord) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO profiles (identity_key, name, domain, age, year, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    key.as_str(),
                    record.name,
                    record.domain,
                    record.age,
                    record.year,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(StoreError::backend)?;
        tracing::debug!(key = %key, "profile stored");
        Ok(())
    }
}

impl BlobStore for SqliteStore {
    fn put(&self, key: &IdentityKey, bytes: &[u8]) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO images (identity_key, content_type, bytes, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.as_str(), IMAGE_CONTENT_TYPE, bytes, Utc::now().to_rfc3339()],
            )
            .map_err(StoreError::backend)?;
        tracing::debug!(key = %key, bytes = bytes.len(), "image stored");
        Ok(())
    }

    fn get(&self, key: &IdentityKey) -> Result<Option<Vec<u8>>, StoreError> {
        self.conn
            .query_row(
                "SELECT bytes FROM images WHERE identity_key = ?1",
                params![key.as_str()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(StoreError::backend)
    }
}
