//! SQLite-backed persistence for the append-only session entry log (spec §3).
//!
//! Grounded on the teacher's `session_sqlite.rs` table layout (header/entries/
//! meta tables, WAL journal mode) — trimmed to the entry shapes this host
//! actually appends (`SessionEntry`), and generalized from "load a whole
//! session file" to "append one entry and keep a running message count".

use crate::error::{Error, Result};
use crate::session::{SessionEntry, SessionHeader};
use std::path::Path;

const INIT_SQL: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS ext_session_header (
  id TEXT PRIMARY KEY,
  json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ext_session_entries (
  seq INTEGER PRIMARY KEY,
  json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ext_session_meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
";

pub struct SessionStore {
    conn: rusqlite::Connection,
}

impl SessionStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(INIT_SQL)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch(INIT_SQL)?;
        Ok(Self { conn })
    }

    pub fn write_header(&self, header: &SessionHeader) -> Result<()> {
        let json = serde_json::to_string(header)?;
        self.conn.execute(
            "INSERT INTO ext_session_header (id, json) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET json = excluded.json",
            rusqlite::params![header.id, json],
        )?;
        Ok(())
    }

    pub fn read_header(&self) -> Result<Option<SessionHeader>> {
        let mut stmt = self
            .conn
            .prepare("SELECT json FROM ext_session_header LIMIT 1")?;
        let mut rows = stmt.query([])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let json: String = row.get(0)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Append one entry and return its sequence number. Atomic: the seq is
    /// assigned by SQLite's own rowid, so concurrent appends from a single
    /// connection never collide.
    pub fn append_entry(&self, entry: &SessionEntry) -> Result<i64> {
        let json = serde_json::to_string(entry)?;
        self.conn
            .execute("INSERT INTO ext_session_entries (json) VALUES (?1)", [json])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn load_entries(&self) -> Result<Vec<SessionEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT json FROM ext_session_entries ORDER BY seq ASC")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, rusqlite::Error>>()?;
        rows.into_iter()
            .map(|json| serde_json::from_str(&json).map_err(Error::from))
            .collect()
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ext_session_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM ext_session_meta WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        Ok(match rows.next()? {
            Some(row) => Some(row.get(0)?),
            None => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CustomEntry, EntryBase};

    fn base() -> EntryBase {
        EntryBase {
            id: Some("e1".to_string()),
            parent_id: None,
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn append_and_load_round_trips() {
        let store = SessionStore::open_in_memory().expect("open");
        let entry = SessionEntry::Custom(CustomEntry {
            base: base(),
            custom_type: "note".to_string(),
            data: Some(serde_json::json!({"text": "hello"})),
        });
        let seq = store.append_entry(&entry).expect("append");
        assert_eq!(seq, 1);
        let loaded = store.load_entries().expect("load");
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn header_upsert_keeps_latest() {
        let store = SessionStore::open_in_memory().expect("open");
        let header = SessionHeader {
            id: "s1".to_string(),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
        };
        store.write_header(&header).expect("write");
        store.write_header(&header).expect("write again");
        let loaded = store.read_header().expect("read").expect("some");
        assert_eq!(loaded.id, "s1");
    }

    #[test]
    fn meta_roundtrip() {
        let store = SessionStore::open_in_memory().expect("open");
        store.set_meta("name", "My Session").expect("set");
        assert_eq!(
            store.get_meta("name").expect("get"),
            Some("My Session".to_string())
        );
        assert_eq!(store.get_meta("missing").expect("get"), None);
    }
}
