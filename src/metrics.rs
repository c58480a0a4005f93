use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::driver::ensure_metrics_described;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Installs the Prometheus recorder and publishes the connector identity
    /// as a constant gauge.
    pub fn init(connector: &str) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        gauge!("connector_info", "connector" => connector.to_string()).set(1.0);
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }

    /// Serves [`Metrics::router`] on its own listener.
    pub async fn serve(&self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding metrics listener {addr}"))?;
        tracing::info!(%addr, "metrics exposed on /metrics");
        axum::serve(listener, self.router())
            .await
            .context("metrics server")?;
        Ok(())
    }
}
