use std::fmt::Display;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::UsageRecord;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY: Duration = Duration::from_secs(1);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Event handed to the remote collector, one per tracked call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub ts: String,
}

impl TelemetryEvent {
    pub fn from_record(user_id: &str, record: &UsageRecord) -> Self {
        Self {
            user_id: user_id.to_string(),
            provider: record.provider.clone(),
            model: record.model.clone(),
            tokens_in: record.tokens_in,
            tokens_out: record.tokens_out,
            ts: record.timestamp.clone(),
        }
    }
}

/// Fire-and-forget delivery. Implementations must return without waiting
/// for the network.
pub trait TelemetrySink: Send + Sync {
    fn send(&self, base_url: &str, event: TelemetryEvent);
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Run `f` until it succeeds, retrying up to `max_retries` times with
/// exponential backoff starting at `base_delay`. Blocks the calling thread.
pub fn retry<T, E: Display>(
    max_retries: u32,
    base_delay: Duration,
    mut f: impl FnMut() -> std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    let mut attempt = 0;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= max_retries => return Err(e),
            Err(e) => {
                let delay = base_delay * 2u32.pow(attempt);
                debug!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

fn post_event(url: &str, event: &TelemetryEvent) -> Result<()> {
    let payload = serde_json::to_string(event)?;
    ureq::post(url)
        .header("Content-Type", "application/json")
        .send(payload.as_str())
        .with_context(|| format!("POST {url}"))?;
    Ok(())
}

/// Posts events to `{baseUrl}/ingest` on the blocking pool.
pub struct HttpTelemetry;

impl TelemetrySink for HttpTelemetry {
    fn send(&self, base_url: &str, event: TelemetryEvent) {
        if base_url.is_empty() || event.user_id.is_empty() {
            return;
        }
        let url = endpoint(base_url, "ingest");
        tokio::task::spawn_blocking(move || {
            match retry(MAX_RETRIES, BASE_DELAY, || post_event(&url, &event)) {
                Ok(()) => debug!(url = %url, "telemetry sent"),
                Err(e) => warn!(url = %url, error = %e, "failed to send telemetry"),
            }
        });
    }
}

/// Whether the collector's `/health` endpoint answers. Blocking.
pub fn test_connection(base_url: &str) -> bool {
    if base_url.is_empty() {
        return false;
    }
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(HEALTH_TIMEOUT))
        .build()
        .into();
    agent.get(&endpoint(base_url, "health")).call().is_ok()
}

/// `{baseUrl}/today?user_id=<id>` with the id query-encoded.
pub fn today_url(base_url: &str, user_id: &str) -> Result<String> {
    if base_url.is_empty() || user_id.is_empty() {
        bail!("base URL and user id are required");
    }
    let mut url = url::Url::parse(&endpoint(base_url, "today"))
        .with_context(|| format!("invalid collector URL {base_url:?}"))?;
    url.query_pairs_mut().append_pair("user_id", user_id);
    Ok(url.into())
}

/// The collector's view of today for `user_id`. Blocking.
pub fn fetch_today(base_url: &str, user_id: &str) -> Result<serde_json::Value> {
    let url = today_url(base_url, user_id)?;
    let body = ureq::get(&url)
        .call()
        .with_context(|| format!("GET {url}"))?
        .body_mut()
        .read_to_string()?;
    serde_json::from_str(&body).context("collector returned invalid JSON")
}
