use std::collections::BTreeMap;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::footprint::Footprint;

/// Sentinel for calls no provider claims and for models nothing could identify.
pub const UNKNOWN: &str = "unknown";

/// One classified call. Folded into the day's aggregate, never stored on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub timestamp: String,
    /// Local calendar day, `YYYY-MM-DD`.
    pub date: String,
}

impl UsageRecord {
    /// A record stamped with the current instant and today's local date.
    /// Token counts are not observable from the request side and stay zero.
    pub fn now(provider: impl Into<String>, model: impl Into<String>) -> Self {
        let now: DateTime<Utc> = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider: provider.into(),
            model: model.into(),
            tokens_in: 0,
            tokens_out: 0,
            timestamp: now.to_rfc3339(),
            date: now.with_timezone(&Local).format("%Y-%m-%d").to_string(),
        }
    }
}

/// Per-day counters and the derived footprint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyAggregate {
    pub date: String,
    pub call_count: u64,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub providers: BTreeMap<String, u64>,
    pub models: BTreeMap<String, u64>,
    pub kwh: f64,
    pub water_liters: f64,
    pub co2_kg: f64,
}

impl DailyAggregate {
    pub fn empty(date: &str) -> Self {
        Self {
            date: date.to_string(),
            ..Self::default()
        }
    }

    /// Count one call. Derived fields are left to `apply_footprint`.
    pub fn accumulate(&mut self, record: &UsageRecord) {
        self.call_count += 1;
        self.total_tokens_in += record.tokens_in;
        self.total_tokens_out += record.tokens_out;
        *self.providers.entry(record.provider.clone()).or_insert(0) += 1;
        *self.models.entry(record.model.clone()).or_insert(0) += 1;
    }

    pub fn apply_footprint(&mut self, f: Footprint) {
        self.kwh = f.kwh;
        self.water_liters = f.water_liters;
        self.co2_kg = f.co2_kg;
    }

    /// Histogram entries sorted by count, highest first, ties by name.
    pub fn top(map: &BTreeMap<String, u64>) -> Vec<(&str, u64)> {
        let mut entries: Vec<(&str, u64)> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
    }
}

/// Persisted form of all days, keyed by date.
pub type DailyUsage = BTreeMap<String, DailyAggregate>;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(provider: &str, model: &str) -> UsageRecord {
        UsageRecord {
            id: "r".into(),
            provider: provider.into(),
            model: model.into(),
            tokens_in: 0,
            tokens_out: 0,
            timestamp: "2024-01-01T10:00:00+00:00".into(),
            date: "2024-01-01".into(),
        }
    }

    #[test]
    fn accumulate_counts_histograms() {
        let mut agg = DailyAggregate::empty("2024-01-01");
        agg.accumulate(&record("openai", "gpt-4"));
        agg.accumulate(&record("openai", "gpt-4o"));
        agg.accumulate(&record("anthropic", "claude-web"));
        assert_eq!(agg.call_count, 3);
        assert_eq!(agg.providers["openai"], 2);
        assert_eq!(agg.providers["anthropic"], 1);
        assert_eq!(agg.models["gpt-4"], 1);
        assert_eq!(
            DailyAggregate::top(&agg.providers),
            vec![("openai", 2), ("anthropic", 1)]
        );
    }

    #[test]
    fn persisted_shape_is_camel_case() {
        let agg = DailyAggregate::empty("2024-01-01");
        let v = serde_json::to_value(&agg).unwrap();
        assert!(v.get("callCount").is_some());
        assert!(v.get("waterLiters").is_some());
        assert!(v.get("co2Kg").is_some());
        assert!(v.get("totalTokensIn").is_some());
    }

    #[test]
    fn new_records_have_zero_tokens_and_a_date() {
        let r = UsageRecord::now("openai", "gpt-4");
        assert_eq!(r.tokens_in, 0);
        assert_eq!(r.tokens_out, 0);
        assert_eq!(r.date.len(), 10);
        assert!(!r.id.is_empty());
    }
}
