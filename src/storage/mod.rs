#[cfg(not(feature = "sqlite"))]
pub mod file_store;
pub mod memory_store;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

use std::sync::Arc;

use async_trait::async_trait;

/// Keys under which the usage store keeps its state.
pub const DAILY_USAGE_KEY: &str = "ecomind_daily_usage";
pub const TODAY_COUNT_KEY: &str = "ecomind_today_count";
pub const LAST_RESET_DATE_KEY: &str = "ecomind_last_reset_date";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode value: {0}")]
    Encode(String),
    #[error("storage backend failed: {0}")]
    Backend(String),
    #[error("invalid usage record: {0}")]
    InvalidRecord(String),
}

/// Persistent key-value collaborator.
///
/// Values are JSON text. There are no transactions and no compare-and-swap:
/// callers that read-modify-write must serialize themselves.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
}

pub fn default_storage() -> Arc<dyn KvStore> {
    #[cfg(feature = "sqlite")]
    {
        Arc::new(sqlite_store::SqliteStore::open())
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Arc::new(file_store::FileStore::new())
    }
}
