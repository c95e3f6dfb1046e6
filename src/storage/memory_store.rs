use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use super::{KvStore, StoreError};

/// In-process store for `--ephemeral` runs.
///
/// Each call can be delayed by a random amount up to `max_latency` before it
/// touches the map, which widens the window between a caller's read and its
/// write the way a slow backend would.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    max_latency: Option<Duration>,
    failing_writes: AtomicUsize,
    failing_key: Mutex<Option<String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_latency(max: Duration) -> Self {
        Self {
            max_latency: Some(max),
            ..Self::default()
        }
    }

    /// Make the next `n` writes fail.
    #[cfg(test)]
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Make every write to `key` fail; `None` heals the store.
    #[cfg(test)]
    pub fn fail_writes_to(&self, key: Option<&str>) {
        *self.failing_key.lock().unwrap() = key.map(str::to_string);
    }

    #[cfg(test)]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let Some(max) = self.max_latency else { return };
        let micros = max.as_micros() as u64;
        let wait = if micros == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=micros)
        };
        if wait > 0 {
            tokio::time::sleep(Duration::from_micros(wait)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    fn take_failure(&self, key: &str) -> bool {
        let key_fails = match self.failing_key.lock() {
            Ok(g) => g.as_deref() == Some(key),
            Err(poisoned) => poisoned.into_inner().as_deref() == Some(key),
        };
        key_fails
            || self
                .failing_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.delay().await;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.delay().await;
        if self.take_failure(key) {
            return Err(StoreError::Backend(format!("injected write failure for {key}")));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(key.to_string(), value);
        Ok(())
    }
}
