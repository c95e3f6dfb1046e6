use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SettingsHandle;
use crate::storage::{KvStore, StoreError, DAILY_USAGE_KEY, LAST_RESET_DATE_KEY, TODAY_COUNT_KEY};
use crate::types::{DailyAggregate, DailyUsage, UsageRecord};

const CACHE_TTL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct CacheState {
    entry: Option<(Instant, Arc<DailyUsage>)>,
    /// Bumped on every write so a read that raced a write cannot install
    /// the older map it fetched.
    generation: u64,
}

/// Date-keyed usage aggregates on top of a [`KvStore`].
///
/// Every mutation runs under one fair async mutex, so mutations apply in the
/// order they were issued and each sees the effects of all earlier ones. The
/// mutation path always reads the backing store. Read-only callers may be
/// served from a cache that each successful write refreshes.
pub struct UsageStore {
    kv: Arc<dyn KvStore>,
    settings: SettingsHandle,
    write_lock: Mutex<()>,
    cache: std::sync::Mutex<CacheState>,
    cache_ttl: Duration,
}

impl UsageStore {
    pub fn new(kv: Arc<dyn KvStore>, settings: SettingsHandle) -> Self {
        Self {
            kv,
            settings,
            write_lock: Mutex::new(()),
            cache: std::sync::Mutex::new(CacheState::default()),
            cache_ttl: CACHE_TTL,
        }
    }

    #[cfg(test)]
    fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, CacheState> {
        match self.cache.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!(key, error = %e, "ignoring malformed stored value");
                Ok(None)
            }
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|e| StoreError::Encode(e.to_string()))?;
        self.kv.set(key, raw).await
    }

    /// Current map straight from the backing store.
    async fn load_usage(&self) -> Result<DailyUsage, StoreError> {
        Ok(self.read_json(DAILY_USAGE_KEY).await?.unwrap_or_default())
    }

    /// Persist the whole map and swap it into the cache. Caller holds the
    /// write lock.
    async fn save_usage(&self, usage: DailyUsage) -> Result<(), StoreError> {
        let result = self.write_json(DAILY_USAGE_KEY, &usage).await;
        let mut cache = self.cache();
        cache.generation += 1;
        cache.entry = if result.is_ok() {
            Some((Instant::now(), Arc::new(usage)))
        } else {
            None
        };
        result
    }

    /// Map for read-only callers, from cache when fresh.
    async fn cached_usage(&self) -> Result<Arc<DailyUsage>, StoreError> {
        let generation = {
            let cache = self.cache();
            if let Some((at, usage)) = &cache.entry {
                if at.elapsed() < self.cache_ttl {
                    return Ok(Arc::clone(usage));
                }
            }
            cache.generation
        };

        let usage = Arc::new(self.load_usage().await?);

        let mut cache = self.cache();
        if cache.generation == generation {
            cache.entry = Some((Instant::now(), Arc::clone(&usage)));
        }
        Ok(usage)
    }

    fn check_date(record: &UsageRecord) -> Result<(), StoreError> {
        match NaiveDate::parse_from_str(&record.date, "%Y-%m-%d") {
            Ok(_) => Ok(()),
            Err(_) => Err(StoreError::InvalidRecord(format!(
                "record {} has malformed date {:?}",
                record.id, record.date
            ))),
        }
    }

    /// Load, fold in `record`, persist. Caller holds the write lock.
    ///
    /// The footprint is recomputed from the day's total call count using the
    /// estimation parameters current at the moment this runs.
    async fn apply_record(&self, record: &UsageRecord) -> Result<DailyAggregate, StoreError> {
        let mut usage = self.load_usage().await?;
        let params = self.settings.current().estimation_params;

        let day = usage
            .entry(record.date.clone())
            .or_insert_with(|| DailyAggregate::empty(&record.date));
        day.accumulate(record);
        day.apply_footprint(params.footprint(day.call_count));
        let updated = day.clone();

        self.save_usage(usage).await?;
        debug!(
            date = %updated.date,
            provider = %record.provider,
            model = %record.model,
            call_count = updated.call_count,
            "recorded call"
        );
        Ok(updated)
    }

    /// Caller holds the write lock.
    async fn bump_today_count(&self) -> Result<u64, StoreError> {
        let next = self.read_json::<u64>(TODAY_COUNT_KEY).await?.unwrap_or(0) + 1;
        self.write_json(TODAY_COUNT_KEY, &next).await?;
        Ok(next)
    }

    /// Fold one call into its day and persist the map.
    pub async fn record_call(&self, record: &UsageRecord) -> Result<DailyAggregate, StoreError> {
        Self::check_date(record)?;
        let _guard = self.write_lock.lock().await;
        self.apply_record(record).await
    }

    /// Record a call and count it toward today in one critical section, so
    /// no rollover or clear can land between the two writes.
    ///
    /// The aggregate is the record of truth. Once it is committed the call
    /// counts as recorded: a failed counter write is logged and reported as
    /// `None` instead of turning the whole call into an error.
    pub async fn record_call_and_count(
        &self,
        record: &UsageRecord,
    ) -> Result<(DailyAggregate, Option<u64>), StoreError> {
        Self::check_date(record)?;
        let _guard = self.write_lock.lock().await;

        let aggregate = self.apply_record(record).await?;
        let count = match self.bump_today_count().await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(date = %aggregate.date, error = %e, "call recorded but today counter not updated");
                None
            }
        };
        Ok((aggregate, count))
    }

    pub async fn get_aggregate(&self, date: &str) -> Result<Option<DailyAggregate>, StoreError> {
        Ok(self.cached_usage().await?.get(date).cloned())
    }

    /// Every stored day.
    pub async fn daily_usage(&self) -> Result<DailyUsage, StoreError> {
        Ok(self.cached_usage().await?.as_ref().clone())
    }

    /// Remove a day's aggregate. Clearing the day currently being counted
    /// also zeroes the running counter. Returns whether an entry existed.
    ///
    /// Both steps are idempotent, so a clear that failed halfway is finished
    /// by repeating it.
    pub async fn clear_day(&self, date: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut usage = self.load_usage().await?;
        let existed = usage.remove(date).is_some();
        if existed {
            self.save_usage(usage).await?;
        }

        let last_reset: Option<String> = self.read_json(LAST_RESET_DATE_KEY).await?;
        if last_reset.as_deref().map_or(true, |d| d == date) {
            self.write_json(TODAY_COUNT_KEY, &0u64).await?;
        }

        info!(date, existed, "cleared day");
        Ok(existed)
    }

    /// Move the "today" bookkeeping to `today` if it still points elsewhere.
    ///
    /// Aggregates are keyed by date and are never touched here. A store with
    /// no reset date yet simply adopts `today`. Returns whether a rollover
    /// happened.
    pub async fn rollover_if_needed(&self, today: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;

        let last_reset: Option<String> = self.read_json(LAST_RESET_DATE_KEY).await?;
        match last_reset {
            Some(ref d) if d == today => Ok(false),
            None => {
                self.write_json(LAST_RESET_DATE_KEY, today).await?;
                Ok(false)
            }
            Some(previous) => {
                // Date first: if the counter reset then fails, a retry sees
                // today's date and cannot zero calls counted since.
                self.write_json(LAST_RESET_DATE_KEY, today).await?;
                self.write_json(TODAY_COUNT_KEY, &0u64).await?;
                info!(from = %previous, to = today, "daily rollover");
                Ok(true)
            }
        }
    }

    pub async fn increment_today_count(&self) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.bump_today_count().await
    }

    pub async fn today_count(&self) -> Result<u64, StoreError> {
        Ok(self.read_json(TODAY_COUNT_KEY).await?.unwrap_or(0))
    }

    pub async fn last_reset_date(&self) -> Result<Option<String>, StoreError> {
        self.read_json(LAST_RESET_DATE_KEY).await
    }
}
