// src/driver/poll.rs
//! Poll loop for sources that expose their currently active alerts.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;

use super::{ConnectorContext, Outcome};
use crate::sighting::SightingCache;

#[async_trait]
pub trait PollSource: Send + Sync {
    /// Full set of alerts the source currently reports.
    async fn fetch(&self) -> Result<Vec<Value>>;
    fn name(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug)]
pub struct PollerCfg {
    pub interval: Duration,
    /// Record the first fetch without forwarding it.
    pub seed: bool,
}

impl Default for PollerCfg {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            seed: true,
        }
    }
}

/// Counters of one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub duplicates: usize,
    pub forwarded: usize,
    pub filtered: usize,
    pub failed: usize,
}

pub struct Poller<S> {
    source: S,
    cache: SightingCache,
    ctx: ConnectorContext,
    cfg: PollerCfg,
}

impl<S: PollSource> Poller<S> {
    pub fn new(source: S, cache: SightingCache, ctx: ConnectorContext, cfg: PollerCfg) -> Self {
        Self {
            source,
            cache,
            ctx,
            cfg,
        }
    }

    pub fn cache(&self) -> &SightingCache {
        &self.cache
    }

    /// Records the current backlog so it is not replayed. A failed fetch
    /// leaves the cache empty.
    pub async fn seed(&mut self) -> usize {
        match self.source.fetch().await {
            Ok(items) => {
                let n = self.cache.seed(items.iter());
                tracing::info!(source = self.source.name(), seeded = n, "seeded existing alerts");
                n
            }
            Err(e) => {
                counter!("connector_poll_errors_total", "connector" => self.ctx.name().to_string())
                    .increment(1);
                tracing::warn!(source = self.source.name(), error = ?e, "initial fetch failed, starting with empty seed");
                0
            }
        }
    }

    /// One cycle: fetch, forward what is new, forget what resolved.
    pub async fn poll_once(&mut self) -> Result<PollReport> {
        let items = self.source.fetch().await?;
        let mut report = PollReport {
            fetched: items.len(),
            ..PollReport::default()
        };
        let mut active = HashSet::with_capacity(items.len());

        for item in items {
            active.insert(self.cache.fingerprint(&item));
            if self.cache.observe(&item) {
                report.duplicates += 1;
                counter!("connector_duplicates_total", "connector" => self.ctx.name().to_string())
                    .increment(1);
                continue;
            }

            let item = match self.ctx.enrich(item).await {
                Ok(v) => v,
                Err(e) => {
                    report.failed += 1;
                    counter!("connector_poll_errors_total", "connector" => self.ctx.name().to_string())
                        .increment(1);
                    tracing::warn!(source = self.source.name(), error = ?e, "enrichment failed");
                    continue;
                }
            };
            match self.ctx.handle(item).await {
                Outcome::Forwarded => report.forwarded += 1,
                Outcome::Filtered => report.filtered += 1,
                Outcome::Failed => report.failed += 1,
            }
        }

        self.cache.reconcile(&active);
        if report.forwarded > 0 {
            tracing::info!(source = self.source.name(), forwarded = report.forwarded, "processed new alerts");
        }
        Ok(report)
    }

    /// Seeds (unless disabled), then polls forever. Fetch errors are logged
    /// and retried on the next tick.
    pub async fn run(mut self) {
        tracing::info!(
            source = self.source.name(),
            interval_secs = self.cfg.interval.as_secs(),
            "starting poller"
        );
        if self.cfg.seed {
            self.seed().await;
        } else {
            tracing::info!(source = self.source.name(), "seeding disabled, existing alerts will be sent");
        }

        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                counter!("connector_poll_errors_total", "connector" => self.ctx.name().to_string())
                    .increment(1);
                tracing::error!(source = self.source.name(), error = ?e, "polling error");
            }
        }
    }
}
