mod cli;
mod config;
mod domain;
mod footprint;
mod output;
mod providers;
mod scheduler;
mod storage;
mod telemetry;
mod tracker;
mod types;
mod usage_store;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command, OutputFormat};
use config::SettingsHandle;
use scheduler::{local_today, ResetScheduler};
use storage::memory_store::MemoryStore;
use storage::{KvStore, StoreError};
use tracker::{BadgeNotifier, LogBadge, TrackedCall, Tracker};
use usage_store::UsageStore;

/// One line of `ingest` input.
#[derive(Debug, Deserialize)]
struct ObservedRequest {
    url: String,
    #[serde(default)]
    body: Option<String>,
}

fn parse_line(line: &str) -> Option<ObservedRequest> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(req) => Some(req),
        Err(e) => {
            warn!(error = %e, "skipping malformed input line");
            None
        }
    }
}

/// Requests being handled at once during `ingest`/`watch`.
const MAX_IN_FLIGHT: usize = 64;

#[derive(Debug, Default, PartialEq)]
struct IngestTally {
    tracked: usize,
    ignored: usize,
    failed: usize,
}

impl IngestTally {
    fn absorb(
        &mut self,
        joined: Result<Result<Option<TrackedCall>, StoreError>, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(Ok(Some(call))) => {
                debug!(provider = %call.record.provider, model = %call.record.model, "tracked");
                self.tracked += 1;
            }
            Ok(Ok(None)) => self.ignored += 1,
            Ok(Err(e)) => {
                warn!(error = %e, "call not recorded");
                self.failed += 1;
            }
            Err(e) => {
                warn!(error = %e, "ingest task failed");
                self.failed += 1;
            }
        }
    }
}

/// Feed request lines through the tracker until EOF. Up to `max_in_flight`
/// requests run concurrently; the store serializes the writes.
async fn ingest_lines<R>(reader: R, tracker: Arc<Tracker>, max_in_flight: usize) -> Result<IngestTally>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut tasks = JoinSet::new();
    let mut tally = IngestTally::default();

    while let Some(line) = lines.next_line().await.context("reading input")? {
        let Some(req) = parse_line(&line) else { continue };
        while tasks.len() >= max_in_flight.max(1) {
            if let Some(joined) = tasks.join_next().await {
                tally.absorb(joined);
            }
        }
        let tracker = Arc::clone(&tracker);
        tasks.spawn(async move {
            let body = req.body.as_deref().map(str::as_bytes);
            tracker.on_request(&req.url, body).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        tally.absorb(joined);
    }
    Ok(tally)
}

async fn ingest_stdin(tracker: Arc<Tracker>) -> Result<IngestTally> {
    ingest_lines(BufReader::new(tokio::io::stdin()), tracker, MAX_IN_FLIGHT).await
}

fn report(tally: &IngestTally) {
    eprintln!(
        "Recorded {} calls, {} untracked, {} failed.",
        tally.tracked, tally.ignored, tally.failed
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ecomind=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mode = cli.effective_command();

    let mut settings = config::load_settings();
    for domain in &cli.custom_providers {
        if !settings.custom_providers.contains(domain) {
            settings.custom_providers.push(domain.clone());
        }
    }
    let settings = SettingsHandle::new(settings);

    let kv: Arc<dyn KvStore> = if cli.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        storage::default_storage()
    };
    let store = Arc::new(UsageStore::new(kv, settings.clone()));

    let badge: Arc<dyn BadgeNotifier> = Arc::new(LogBadge);
    let scheduler = ResetScheduler::new(Arc::clone(&store)).with_badge(Arc::clone(&badge));
    if let Err(e) = scheduler.run_startup_check().await {
        warn!(error = %e, "startup reset check failed");
    }

    let tracker = Arc::new(
        Tracker::new(Arc::clone(&store), settings.clone())
            .with_badge(Arc::clone(&badge))
            .with_telemetry(Arc::new(telemetry::HttpTelemetry)),
    );

    match mode {
        Command::Today => {
            let today = local_today();
            let day = store
                .get_aggregate(&today)
                .await?
                .unwrap_or_else(|| types::DailyAggregate::empty(&today));
            match cli.format {
                OutputFormat::Json => output::print_json(&day),
                OutputFormat::Table => output::print_aggregate(&day),
            }
        }
        Command::History { from, to } => {
            let usage = store.daily_usage().await?;
            let days: Vec<_> = usage
                .values()
                .filter(|d| {
                    let Ok(date) = chrono::NaiveDate::parse_from_str(&d.date, "%Y-%m-%d") else {
                        return false;
                    };
                    from.map_or(true, |f| date >= f) && to.map_or(true, |t| date <= t)
                })
                .collect();
            if days.is_empty() {
                eprintln!("No usage recorded.");
                return Ok(());
            }
            match cli.format {
                OutputFormat::Json => output::print_json(&days),
                OutputFormat::Table => output::print_history(&days),
            }
        }
        Command::Record { url, body } => {
            let body = body.as_deref().map(str::as_bytes);
            match tracker.on_request(&url, body).await? {
                Some(call) => match cli.format {
                    OutputFormat::Json => output::print_json(&call.aggregate),
                    OutputFormat::Table => output::print_aggregate(&call.aggregate),
                },
                None => eprintln!("Not tracked: {url}"),
            }
        }
        Command::Classify { url, body } => {
            let class = tracker.classify(&url, body.as_deref());
            match cli.format {
                OutputFormat::Json => output::print_json(&class),
                OutputFormat::Table => output::print_classification(&url, class.as_ref()),
            }
        }
        Command::Ingest => {
            report(&ingest_stdin(Arc::clone(&tracker)).await?);
        }
        Command::Watch => {
            let handle = scheduler.spawn();
            info!("watching stdin for requests");
            let result = ingest_stdin(Arc::clone(&tracker)).await;
            handle.abort();
            report(&result?);
        }
        Command::Clear => {
            let today = local_today();
            if tracker.clear_day(&today).await? {
                eprintln!("Cleared {today}.");
            } else {
                eprintln!("Nothing recorded for {today}.");
            }
        }
        Command::Providers { domains } => {
            let providers = tracker.providers();
            if domains {
                let list = tracker.all_domains();
                match cli.format {
                    OutputFormat::Json => output::print_json(&list),
                    OutputFormat::Table => list.iter().for_each(|d| println!("{d}")),
                }
            } else {
                match cli.format {
                    OutputFormat::Json => output::print_json(&providers),
                    OutputFormat::Table => output::print_providers(&providers),
                }
            }
        }
        Command::Ping { base_url } => {
            let base_url = base_url.unwrap_or_else(|| settings.current().base_url);
            if base_url.is_empty() {
                anyhow::bail!("no collector URL: pass --base-url or set baseUrl in the config");
            }
            let target = base_url.clone();
            let ok = tokio::task::spawn_blocking(move || telemetry::test_connection(&target))
                .await
                .context("connection check panicked")?;
            if ok {
                println!("{base_url}: reachable");
            } else {
                println!("{base_url}: unreachable");
                std::process::exit(1);
            }
        }
        Command::Remote { base_url, user_id } => {
            let current = settings.current();
            let base_url = base_url.unwrap_or(current.base_url);
            let user_id = user_id.unwrap_or(current.user_id);
            let today = tokio::task::spawn_blocking(move || {
                telemetry::fetch_today(&base_url, &user_id)
            })
            .await
            .context("remote fetch panicked")??;
            output::print_json(&today);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_lines() {
        let req = parse_line(r#"{"url":"https://api.openai.com/v1/chat","body":"{\"model\":\"gpt-4\"}"}"#)
            .unwrap();
        assert_eq!(req.url, "https://api.openai.com/v1/chat");
        assert_eq!(req.body.as_deref(), Some(r#"{"model":"gpt-4"}"#));

        let req = parse_line(r#"{"url":"https://claude.ai/api"}"#).unwrap();
        assert!(req.body.is_none());
    }

    fn test_tracker() -> Arc<Tracker> {
        let handle = SettingsHandle::default();
        let store = Arc::new(UsageStore::new(Arc::new(MemoryStore::new()), handle.clone()));
        Arc::new(Tracker::new(store, handle))
    }

    #[tokio::test]
    async fn ingest_handles_more_lines_than_the_cap() {
        let mut input = String::new();
        for i in 0..40 {
            let url = if i % 4 == 0 {
                "https://example.com/"
            } else {
                "https://api.openai.com/v1/chat"
            };
            input.push_str(&format!("{{\"url\":\"{url}\"}}\n"));
        }
        input.push_str("garbage\n\n");

        let tracker = test_tracker();
        let tally = ingest_lines(input.as_bytes(), Arc::clone(&tracker), 3)
            .await
            .unwrap();
        assert_eq!(
            tally,
            IngestTally {
                tracked: 30,
                ignored: 10,
                failed: 0
            }
        );
        assert_eq!(tracker.store().today_count().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn zero_cap_still_makes_progress() {
        let input = "{\"url\":\"https://api.cohere.ai/v1/chat\"}\n".repeat(5);
        let tally = ingest_lines(input.as_bytes(), test_tracker(), 0).await.unwrap();
        assert_eq!(tally.tracked, 5);
    }

    #[test]
    fn skips_blank_and_malformed_lines() {
        assert!(parse_line("   ").is_none());
        assert!(parse_line("not json").is_none());
        assert!(parse_line(r#"{"body":"x"}"#).is_none());
    }
}
