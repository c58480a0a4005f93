//! Prometheus alerting rules, polled from `/api/v1/alerts`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};

use super::IDMEFV2_VERSION;
use crate::converter::Converter;
use crate::driver::poll::PollSource;
use crate::error::CompileError;
use crate::sighting::SightingConfig;
use crate::template::{Template, Transform};
use crate::transforms::{field_or, iso_timestamp_or_now, local_ip, uuid};

static OUTAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)down|unreachable").unwrap());
static RESOURCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)high.*(cpu|memory)|(cpu|memory).*high").unwrap());
static DEGRADED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)disk|storage|latency|slow").unwrap());

/// `severity` label to IDMEFv2 priority.
pub fn severity() -> Transform {
    Transform::lookup(
        "prometheus_severity",
        [
            ("critical", "High"),
            ("high", "High"),
            ("warning", "Medium"),
            ("medium", "Medium"),
            ("low", "Low"),
            ("info", "Info"),
            ("information", "Info"),
            ("none", "Unknown"),
        ]
        .map(|(k, v)| (json!(k), json!(v))),
        Some(json!("Unknown")),
    )
}

/// Lowercases a string label before table lookups.
fn lowercase() -> Transform {
    Transform::unary("lowercase", |v| {
        Ok(match v {
            Value::String(s) => json!(s.to_lowercase()),
            other => json!(other.to_string().to_lowercase()),
        })
    })
}

/// Alert name to IDMEFv2 category.
pub fn category() -> Transform {
    Transform::unary("prometheus_category", |v| {
        let name = v.as_str().unwrap_or_default();
        let cat = if OUTAGE.is_match(name) {
            "Availability.Outage"
        } else if RESOURCE.is_match(name) || DEGRADED.is_match(name) {
            "Availability.Failure"
        } else {
            "Other.Uncategorised"
        };
        Ok(json!([cat]))
    })
}

/// `instance` label (`host:port`, `[v6]:port`) to a bare host.
pub fn hostname() -> Transform {
    Transform::unary("instance_host", |v| {
        let instance = v.as_str().unwrap_or_default();
        Ok(json!(instance_host(instance)))
    })
}

fn instance_host(instance: &str) -> &str {
    if instance.is_empty() {
        return "unknown";
    }
    if let Some(rest) = instance.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match instance.rsplit_once(':') {
        Some((host, _)) => host,
        None => instance,
    }
}

pub fn template() -> Result<Template, CompileError> {
    let label_severity = field_or("$.severity", json!("none"))?;
    let label_instance = field_or("$.instance", json!(""))?;
    Ok(Template::map([
        ("Version", Template::lit(IDMEFV2_VERSION)),
        ("ID", uuid().into()),
        ("CreateTime", Template::call(iso_timestamp_or_now(), ["$.activeAt".into()])),
        ("Category", Template::call(category(), ["$.labels.alertname".into()])),
        (
            "Priority",
            Template::call(
                severity(),
                [Template::call(
                    lowercase(),
                    [Template::call(label_severity, ["$.labels".into()])],
                )],
            ),
        ),
        ("Description", "$.labels.alertname".into()),
        (
            "Analyzer",
            Template::map([
                ("IP", local_ip().into()),
                ("Name", "prometheus".into()),
                ("Model", "Prometheus Monitoring".into()),
                ("Type", "Availability".into()),
                ("Category", Template::lit(json!(["NMS"]))),
                ("Data", Template::lit(json!(["System"]))),
                ("Method", Template::lit(json!(["Monitor"]))),
            ]),
        ),
        (
            "Source",
            Template::seq([Template::map([(
                "Hostname",
                Template::call(
                    hostname(),
                    [Template::call(label_instance, ["$.labels".into()])],
                ),
            )])]),
        ),
    ]))
}

/// Only firing alerts; pending ones have not crossed their `for` clause yet.
pub fn filter(src: &Value) -> bool {
    src.get("state")
        .and_then(Value::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("firing"))
}

pub fn converter() -> Result<Converter, CompileError> {
    Ok(Converter::new(&template()?)?.with_filter(filter))
}

/// One alert instance: rule name, activation time and full label set.
pub fn sighting() -> SightingConfig {
    SightingConfig::new(["$.labels.alertname", "$.activeAt", "$.labels"])
}

/// Reads the active alerts of a Prometheus server.
pub struct PrometheusSource {
    alerts_url: String,
    client: Client,
    timeout: Duration,
}

impl PrometheusSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            alerts_url: format!("{}/api/v1/alerts", base_url.trim_end_matches('/')),
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

/// Extracts `data.alerts` from an API response; a non-success status yields
/// nothing.
pub fn alerts_from_response(body: &Value) -> Vec<Value> {
    if body.get("status").and_then(Value::as_str) != Some("success") {
        tracing::warn!(response = %crate::error::excerpt(body), "Prometheus API returned non-success status");
        return Vec::new();
    }
    body.pointer("/data/alerts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl PollSource for PrometheusSource {
    async fn fetch(&self) -> Result<Vec<Value>> {
        let body: Value = self
            .client
            .get(&self.alerts_url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("GET {}", self.alerts_url))?
            .error_for_status()?
            .json()
            .await
            .context("decoding Prometheus alerts")?;
        Ok(alerts_from_response(&body))
    }

    fn name(&self) -> &'static str {
        "prometheus"
    }
}
