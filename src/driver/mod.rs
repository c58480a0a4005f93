// src/driver/mod.rs
//! Input drivers and the per-connector context they share.
//!
//! Every driver hands raw items to a [`ConnectorContext`], which runs the
//! filter, evaluates the template and forwards the result. Items are
//! processed one at a time; a failing item is logged and skipped.

pub mod poll;
pub mod push;
pub mod socket;
pub mod tail;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::client::AlertSink;
use crate::converter::Converter;
use crate::error::excerpt;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("connector_received_total", "Raw items handed to the converter.");
        describe_counter!(
            "connector_forwarded_total",
            "Normalized alerts accepted by the IDMEFv2 server."
        );
        describe_counter!("connector_filtered_total", "Items rejected by the filter.");
        describe_counter!(
            "connector_conversion_errors_total",
            "Items that failed JSON parsing or template evaluation."
        );
        describe_counter!(
            "connector_post_errors_total",
            "Normalized alerts the IDMEFv2 server did not accept."
        );
        describe_counter!(
            "connector_duplicates_total",
            "Polled items suppressed by the sighting cache."
        );
        describe_counter!(
            "connector_poll_errors_total",
            "Failed fetches or enrichments of a polled source."
        );
    });
}

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Forwarded,
    Filtered,
    Failed,
}

/// Adds context a raw item does not carry (API lookups, server facts)
/// before conversion.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, item: Value) -> Result<Value>;
}

/// Everything a driver needs to process items for one connector. Built once
/// at start-up and cloned into loops and request handlers.
#[derive(Clone)]
pub struct ConnectorContext {
    name: String,
    converter: Arc<Converter>,
    sink: Arc<dyn AlertSink>,
    enricher: Option<Arc<dyn Enricher>>,
}

impl ConnectorContext {
    pub fn new(name: impl Into<String>, converter: Converter, sink: Arc<dyn AlertSink>) -> Self {
        ensure_metrics_described();
        Self {
            name: name.into(),
            converter: Arc::new(converter),
            sink,
            enricher: None,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    /// Runs the enricher, if any; identity otherwise.
    pub async fn enrich(&self, item: Value) -> Result<Value> {
        match &self.enricher {
            Some(e) => e.enrich(item).await,
            None => Ok(item),
        }
    }

    /// Parses one JSON document and handles it.
    pub async fn handle_raw(&self, raw: &[u8]) -> Outcome {
        match serde_json::from_slice::<Value>(raw) {
            Ok(item) => self.handle(item).await,
            Err(e) => {
                counter!("connector_received_total", "connector" => self.name.clone()).increment(1);
                counter!("connector_conversion_errors_total", "connector" => self.name.clone())
                    .increment(1);
                tracing::warn!(
                    connector = %self.name,
                    error = %e,
                    input = %String::from_utf8_lossy(&raw[..raw.len().min(160)]),
                    "invalid JSON input"
                );
                Outcome::Failed
            }
        }
    }

    /// Filter, evaluate, forward.
    pub async fn handle(&self, item: Value) -> Outcome {
        counter!("connector_received_total", "connector" => self.name.clone()).increment(1);
        tracing::debug!(connector = %self.name, item = %excerpt(&item), "received");

        let alert = match self.converter.convert(&item) {
            Ok((true, alert)) => alert,
            Ok((false, _)) => {
                counter!("connector_filtered_total", "connector" => self.name.clone()).increment(1);
                tracing::debug!(connector = %self.name, "filtered out");
                return Outcome::Filtered;
            }
            Err(e) => {
                counter!("connector_conversion_errors_total", "connector" => self.name.clone())
                    .increment(1);
                tracing::warn!(connector = %self.name, culprit = e.culprit(), error = %e, "conversion failed");
                return Outcome::Failed;
            }
        };

        match self.sink.post(&alert).await {
            Ok(()) => {
                counter!("connector_forwarded_total", "connector" => self.name.clone()).increment(1);
                tracing::info!(
                    connector = %self.name,
                    id = alert.get("ID").and_then(serde_json::Value::as_str).unwrap_or_default(),
                    "IDMEFv2 alert sent"
                );
                Outcome::Forwarded
            }
            Err(e) => {
                counter!("connector_post_errors_total", "connector" => self.name.clone()).increment(1);
                tracing::error!(connector = %self.name, error = %e, "POST failed");
                Outcome::Failed
            }
        }
    }
}
