use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{KvStore, StoreError};

const SCHEMA_VERSION: i64 = 1;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn db_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "ecomind").map(|d| d.cache_dir().join("store.db"))
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteStore {
    pub fn open() -> Self {
        let conn = db_path()
            .and_then(|path| {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                match Connection::open(&path) {
                    Ok(c) => Some(c),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "cannot open sqlite store, using memory");
                        None
                    }
                }
            })
            .or_else(|| Connection::open_in_memory().ok())
            .expect("Failed to open in-memory sqlite");

        if let Err(e) = init_schema(&conn) {
            warn!(error = %e, "failed to initialize sqlite schema");
        }

        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    #[cfg(test)]
    fn in_memory() -> Self {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory sqlite");
        init_schema(&conn).expect("schema");
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| backend("sqlite connection poisoned"))?;
            f(&*guard).map_err(backend)
        })
        .await
        .map_err(backend)?
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS kv (
             key   TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );

         PRAGMA user_version = {SCHEMA_VERSION};"
    ))
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_replaces_value() {
        let store = SqliteStore::in_memory();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "1".to_string()).await.unwrap();
        store.set("k", "2".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn schema_version_is_recorded() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let v: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(v, SCHEMA_VERSION);
    }
}
