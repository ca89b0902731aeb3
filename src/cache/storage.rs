//! Cache storage traits and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::http::Response;

use super::traits::{CachedEntry, RequestKey};

/// Entry-level access within a generation.
///
/// This is all a fetch strategy gets to see: it can read and upsert, but
/// never create or drop a generation.
pub trait EntryStore: Send + Sync {
  /// Look up a request in a generation.
  fn get_entry(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Insert or overwrite an entry. Fails if the generation does not exist.
  fn put_entry(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()>;
}

/// Generation management, reserved for the lifecycle manager.
pub trait GenerationStore: EntryStore {
  /// Create a generation (or reopen it) and write all entries atomically.
  fn create_generation(&self, label: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// All generation labels, oldest first.
  fn generations(&self) -> Result<Vec<String>>;

  /// Drop a generation and every entry in it. Returns false if it did not exist.
  fn delete_generation(&self, label: &str) -> Result<bool>;

  /// Request identities stored in a generation.
  fn keys(&self, label: &str) -> Result<Vec<RequestKey>>;

  fn has_generation(&self, label: &str) -> Result<bool> {
    Ok(self.generations()?.iter().any(|g| g == label))
  }

  fn entry_count(&self, label: &str) -> Result<usize> {
    Ok(self.keys(label)?.len())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Private in-memory database, gone when dropped.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per deployed version label
CREATE TABLE IF NOT EXISTS generations (
    label TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request identity
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_hash),
    FOREIGN KEY (generation) REFERENCES generations(label) ON DELETE CASCADE
);
"#;

const UPSERT_ENTRY: &str =
  "INSERT OR REPLACE INTO entries (generation, request_hash, method, url, status, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))";

fn upsert_entry(
  conn: &Connection,
  generation: &str,
  key: &RequestKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      UPSERT_ENTRY,
      params![
        generation,
        key.cache_hash(),
        key.method,
        key.url,
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {} {}: {}", key.method, key.url, e))?;

  Ok(())
}

impl EntryStore for SqliteStorage {
  fn get_entry(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE generation = ? AND request_hash = ?",
        params![generation, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entry: {}", e))?;

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CachedEntry {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at_str)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_entry(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    upsert_entry(&conn, generation, key, response)
  }
}

impl GenerationStore for SqliteStorage {
  fn create_generation(&self, label: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Rolled back on drop if any write fails
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO generations (label) VALUES (?)",
      params![label],
    )
    .map_err(|e| eyre!("Failed to create generation {}: {}", label, e))?;

    for (key, response) in entries {
      upsert_entry(&tx, label, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT label FROM generations ORDER BY created_at, rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let labels = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation label: {}", e))?;

    Ok(labels)
  }

  fn delete_generation(&self, label: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![label])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", label, e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE label = ?", params![label])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", label, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn keys(&self, label: &str) -> Result<Vec<RequestKey>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM entries WHERE generation = ? ORDER BY url, method")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![label], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list entries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    Ok(keys)
  }

  fn entry_count(&self, label: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE generation = ?",
        params![label],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("http://localhost:8000").unwrap().join(path).unwrap();
    RequestKey::new(&Method::GET, &url)
  }

  #[test]
  fn test_create_generation_writes_all_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entries = vec![
      (key("/"), Response::new(200, "root")),
      (key("/index.html"), Response::new(200, "index")),
    ];

    storage.create_generation("v1", &entries).unwrap();

    assert_eq!(storage.generations().unwrap(), vec!["v1"]);
    assert_eq!(storage.entry_count("v1").unwrap(), 2);
    let entry = storage.get_entry("v1", &key("/index.html")).unwrap().unwrap();
    assert_eq!(entry.response.text(), "index");
  }

  #[test]
  fn test_entry_round_trips_headers_and_status() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.create_generation("v1", &[]).unwrap();

    let response = Response::new(203, vec![0u8, 159, 146, 150])
      .with_header("content-type", "application/octet-stream");
    storage.put_entry("v1", &key("/blob"), &response).unwrap();

    let entry = storage.get_entry("v1", &key("/blob")).unwrap().unwrap();
    assert_eq!(entry.response, response);
  }

  #[test]
  fn test_put_entry_overwrites() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.create_generation("v1", &[]).unwrap();

    storage.put_entry("v1", &key("/a.css"), &Response::new(200, "old")).unwrap();
    storage.put_entry("v1", &key("/a.css"), &Response::new(200, "new")).unwrap();

    assert_eq!(storage.entry_count("v1").unwrap(), 1);
    let entry = storage.get_entry("v1", &key("/a.css")).unwrap().unwrap();
    assert_eq!(entry.response.text(), "new");
  }

  #[test]
  fn test_put_entry_requires_generation() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.put_entry("gone", &key("/"), &Response::new(200, "x")).is_err());
    assert!(storage.generations().unwrap().is_empty());
  }

  #[test]
  fn test_generations_are_isolated() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.create_generation("v1", &[(key("/"), Response::new(200, "one"))]).unwrap();
    storage.create_generation("v2", &[(key("/"), Response::new(200, "two"))]).unwrap();

    assert_eq!(storage.get_entry("v1", &key("/")).unwrap().unwrap().response.text(), "one");
    assert_eq!(storage.get_entry("v2", &key("/")).unwrap().unwrap().response.text(), "two");
    assert!(storage.get_entry("v3", &key("/")).unwrap().is_none());
  }

  #[test]
  fn test_delete_generation_drops_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.create_generation("v1", &[(key("/"), Response::new(200, "one"))]).unwrap();
    storage.create_generation("v2", &[(key("/"), Response::new(200, "two"))]).unwrap();

    assert!(storage.delete_generation("v1").unwrap());
    assert!(!storage.delete_generation("v1").unwrap());

    assert_eq!(storage.generations().unwrap(), vec!["v2"]);
    assert_eq!(storage.entry_count("v1").unwrap(), 0);
    assert!(storage.has_generation("v2").unwrap());
    assert!(!storage.has_generation("v1").unwrap());
  }

  #[test]
  fn test_keys_lists_request_identities() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .create_generation(
        "v1",
        &[
          (key("/manifest.json"), Response::new(200, "{}")),
          (key("/"), Response::new(200, "root")),
        ],
      )
      .unwrap();

    let keys = storage.keys("v1").unwrap();
    assert_eq!(keys, vec![key("/"), key("/manifest.json")]);
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2026-10-19 08:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2026-10-19T08:30:00+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
