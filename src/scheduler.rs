use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::storage::StoreError;
use crate::tracker::BadgeNotifier;
use crate::usage_store::UsageStore;

/// Shortest sleep between checks, so waking a hair before midnight costs a
/// short nap instead of a busy loop.
const MIN_WAIT: Duration = Duration::from_millis(100);

pub fn local_today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Time from `now` until the start of the next calendar day in `now`'s zone.
/// If midnight does not exist there (DST gap) the first valid instant after
/// it is used.
pub fn duration_until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let tz = now.timezone();
    let Some(next_day) = now.date_naive().succ_opt() else {
        return MIN_WAIT;
    };
    let Some(midnight) = next_day.and_hms_opt(0, 0, 0) else {
        return MIN_WAIT;
    };

    let target = (0..=2)
        .filter_map(|h| {
            tz.from_local_datetime(&(midnight + chrono::Duration::hours(h)))
                .earliest()
        })
        .next();

    match target {
        Some(t) => t
            .signed_duration_since(now.clone())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(MIN_WAIT),
        None => MIN_WAIT,
    }
}

/// Rolls the usage store over to the new day at process start and at every
/// local midnight afterwards. The badge, if any, is cleared whenever a
/// rollover happens.
pub struct ResetScheduler {
    store: Arc<UsageStore>,
    badge: Option<Arc<dyn BadgeNotifier>>,
}

impl ResetScheduler {
    pub fn new(store: Arc<UsageStore>) -> Self {
        Self { store, badge: None }
    }

    pub fn with_badge(mut self, badge: Arc<dyn BadgeNotifier>) -> Self {
        self.badge = Some(badge);
        self
    }

    async fn rollover(&self, today: &str) -> Result<bool, StoreError> {
        let rolled = self.store.rollover_if_needed(today).await?;
        if rolled {
            if let Some(badge) = &self.badge {
                if let Err(e) = badge.set_count(0) {
                    warn!(error = %e, "badge reset failed");
                }
            }
        }
        Ok(rolled)
    }

    pub async fn run_startup_check(&self) -> Result<bool, StoreError> {
        self.rollover(&local_today()).await
    }

    /// Background loop; abort the handle to stop it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let wait = duration_until_next_midnight(&Local::now());
                debug!(secs = wait.as_secs(), "next rollover check");
                tokio::time::sleep(wait).await;

                let today = local_today();
                match self.rollover(&today).await {
                    Ok(true) => info!(date = %today, "midnight reset done"),
                    Ok(false) => debug!(date = %today, "no reset needed"),
                    Err(e) => warn!(error = %e, "midnight reset failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    use crate::config::SettingsHandle;
    use crate::storage::memory_store::MemoryStore;

    #[test]
    fn one_minute_before_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 0).unwrap();
        assert_eq!(duration_until_next_midnight(&now), Duration::from_secs(60));
    }

    #[test]
    fn exactly_midnight_waits_a_full_day() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(
            duration_until_next_midnight(&now),
            Duration::from_secs(24 * 60 * 60)
        );
    }

    #[test]
    fn uses_the_local_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        // 22:30 UTC is 00:30 the next day at +02:00.
        let now = Utc
            .with_ymd_and_hms(2024, 1, 1, 22, 30, 0)
            .unwrap()
            .with_timezone(&tz);
        assert_eq!(
            duration_until_next_midnight(&now),
            Duration::from_secs(23 * 3600 + 30 * 60)
        );
    }

    #[test]
    fn never_returns_less_than_the_floor() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap()
            + chrono::Duration::milliseconds(990);
        assert_eq!(duration_until_next_midnight(&now), MIN_WAIT);
    }

    #[tokio::test]
    async fn startup_check_rolls_a_stale_store() {
        let kv = Arc::new(MemoryStore::new());
        let store = Arc::new(UsageStore::new(kv, SettingsHandle::default()));
        store.rollover_if_needed("2000-01-01").await.unwrap();

        let scheduler = ResetScheduler::new(Arc::clone(&store));
        assert!(scheduler.run_startup_check().await.unwrap());
        assert!(!scheduler.run_startup_check().await.unwrap());
        assert_eq!(store.last_reset_date().await.unwrap(), Some(local_today()));
    }

    struct CountingBadge(std::sync::Mutex<Vec<u64>>);

    impl BadgeNotifier for CountingBadge {
        fn set_count(&self, count: u64) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(count);
            Ok(())
        }
    }

    #[tokio::test]
    async fn rollover_clears_the_badge_once() {
        let kv = Arc::new(MemoryStore::new());
        let store = Arc::new(UsageStore::new(kv, SettingsHandle::default()));
        store.rollover_if_needed("2000-01-01").await.unwrap();

        let badge = Arc::new(CountingBadge(std::sync::Mutex::new(Vec::new())));
        let scheduler = ResetScheduler::new(Arc::clone(&store)).with_badge(badge.clone());
        scheduler.run_startup_check().await.unwrap();
        scheduler.run_startup_check().await.unwrap();

        assert_eq!(*badge.0.lock().unwrap(), vec![0]);
    }
}
