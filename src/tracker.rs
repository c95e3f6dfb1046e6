use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::config::SettingsHandle;
use crate::providers::{Classification, ProviderDefinition, ProviderRegistry};
use crate::storage::StoreError;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::types::{DailyAggregate, UsageRecord};
use crate::usage_store::UsageStore;

/// Display collaborator showing the day's call count.
pub trait BadgeNotifier: Send + Sync {
    fn set_count(&self, count: u64) -> anyhow::Result<()>;
}

/// Badge for terminal runs: the count goes to the log.
pub struct LogBadge;

impl BadgeNotifier for LogBadge {
    fn set_count(&self, count: u64) -> anyhow::Result<()> {
        debug!(count, "badge");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TrackedCall {
    pub record: UsageRecord,
    pub aggregate: DailyAggregate,
}

/// Entry point for observed requests: classify, record, notify.
pub struct Tracker {
    registry: RwLock<ProviderRegistry>,
    store: Arc<UsageStore>,
    settings: SettingsHandle,
    badge: Option<Arc<dyn BadgeNotifier>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl Tracker {
    pub fn new(store: Arc<UsageStore>, settings: SettingsHandle) -> Self {
        let mut registry = ProviderRegistry::new();
        registry.update_custom_providers(&settings.current().custom_providers);
        Self {
            registry: RwLock::new(registry),
            store,
            settings,
            badge: None,
            telemetry: None,
        }
    }

    pub fn with_badge(mut self, badge: Arc<dyn BadgeNotifier>) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn store(&self) -> &Arc<UsageStore> {
        &self.store
    }

    fn registry(&self) -> RwLockReadGuard<'_, ProviderRegistry> {
        match self.registry.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, ProviderRegistry> {
        match self.registry.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Provider and model for a request, or `None` if no provider claims it.
    pub fn classify(&self, url: &str, body: Option<&str>) -> Option<Classification> {
        let registry = self.registry();
        registry
            .should_track(url)
            .then(|| registry.extract_model(url, body))
    }

    pub fn providers(&self) -> Vec<ProviderDefinition> {
        self.registry().providers().to_vec()
    }

    pub fn all_domains(&self) -> Vec<String> {
        self.registry()
            .all_domains()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Re-apply the custom provider list from the current settings.
    pub fn reload_providers(&self) {
        let custom = self.settings.current().custom_providers;
        self.registry_mut().update_custom_providers(&custom);
        debug!(count = custom.len(), "custom providers reloaded");
    }

    /// Handle one observed request.
    ///
    /// Requests no provider claims are ignored. A body that is not UTF-8 is
    /// treated as absent. An error means the call was not recorded. Once the
    /// aggregate is written, problems with the today counter or the badge or
    /// telemetry are only logged.
    pub async fn on_request(
        &self,
        url: &str,
        raw_body: Option<&[u8]>,
    ) -> Result<Option<TrackedCall>, StoreError> {
        let body = raw_body.and_then(|b| std::str::from_utf8(b).ok());
        let Some(class) = self.classify(url, body) else {
            return Ok(None);
        };

        let record = UsageRecord::now(class.provider, class.model);
        let (aggregate, _) = self.store.record_call_and_count(&record).await?;

        self.update_badge(aggregate.call_count);
        self.forward_telemetry(&record);

        Ok(Some(TrackedCall { record, aggregate }))
    }

    /// Clear a day's usage. The badge goes back to zero when the running
    /// counter was part of what got cleared.
    pub async fn clear_day(&self, date: &str) -> Result<bool, StoreError> {
        let existed = self.store.clear_day(date).await?;
        if self.store.today_count().await? == 0 {
            self.update_badge(0);
        }
        Ok(existed)
    }

    fn update_badge(&self, count: u64) {
        let Some(badge) = &self.badge else { return };
        if let Err(e) = badge.set_count(count) {
            warn!(error = %e, "badge update failed");
        }
    }

    fn forward_telemetry(&self, record: &UsageRecord) {
        let Some(sink) = &self.telemetry else { return };
        let settings = self.settings.current();
        let Some((base_url, user_id)) = settings.telemetry_target() else {
            return;
        };
        sink.send(base_url, TelemetryEvent::from_record(user_id, record));
    }
}
