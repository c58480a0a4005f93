// src/client.rs
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

/// Destination of normalized alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn post(&self, alert: &Value) -> Result<()>;
}

/// POSTs IDMEFv2 alerts as JSON to the collector.
#[derive(Clone)]
pub struct Idmefv2Client {
    url: String,
    client: Client,
    timeout: Duration,
}

impl Idmefv2Client {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            timeout: Duration::from_secs(1),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertSink for Idmefv2Client {
    async fn post(&self, alert: &Value) -> Result<()> {
        let rsp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(alert)
            .send()
            .await
            .map_err(|e| anyhow!("IDMEFv2 POST to {} failed: {e}", self.url))?;
        let status = rsp.status();
        rsp.error_for_status()
            .map_err(|e| anyhow!("IDMEFv2 server HTTP error: {e}"))?;
        tracing::debug!(%status, "IDMEFv2 alert accepted");
        Ok(())
    }
}
