// src/config.rs
//! Connector configuration, read from a TOML file.
//!
//! ```toml
//! [idmefv2]
//! url = "http://127.0.0.1:9999"
//!
//! [connector]
//! kind = "suricata"
//! mode = "tail"
//! logfile = "/var/log/suricata/eve.json"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::connectors::{ConnectorKind, InputMode};

/// Overrides `[idmefv2].url`.
pub const ENV_IDMEFV2_URL: &str = "IDMEFV2_URL";

fn default_level() -> String {
    "info".into()
}
fn default_timeout_secs() -> u64 {
    1
}
fn default_listen_address() -> String {
    "0.0.0.0".into()
}
fn default_listen_port() -> u16 {
    9090
}
fn default_interval_secs() -> u64 {
    30
}
fn default_fuzzy_window_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingCfg,
    #[serde(default)]
    pub idmefv2: Idmefv2Cfg,
    pub connector: ConnectorCfg,
    #[serde(default)]
    pub poll: PollCfg,
    pub zabbix: Option<ZabbixCfg>,
    #[serde(default)]
    pub metrics: MetricsCfg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingCfg {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingCfg {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Idmefv2Cfg {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorCfg {
    pub kind: ConnectorKind,
    /// Defaults to the first mode the kind supports.
    pub mode: Option<InputMode>,
    pub logfile: Option<PathBuf>,
    pub unixsocket: Option<PathBuf>,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// JSON template of the generic connector.
    pub template: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollCfg {
    pub url: Option<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub disable_seeding: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_fuzzy_window_ms")]
    pub fuzzy_window_ms: u64,
}

impl Default for PollCfg {
    fn default() -> Self {
        Self {
            url: None,
            interval_secs: default_interval_secs(),
            disable_seeding: false,
            username: None,
            password: None,
            fuzzy_window_ms: default_fuzzy_window_ms(),
        }
    }
}

impl PollCfg {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn fuzzy_window(&self) -> Duration {
        Duration::from_millis(self.fuzzy_window_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZabbixCfg {
    pub url: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsCfg {
    /// Standalone `/metrics` listener. In push mode the endpoint is also
    /// served by the webhook router.
    pub listen: Option<SocketAddr>,
}

impl Config {
    /// Reads, overrides from the environment and validates.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut cfg: Config = toml::from_str(text).context("parsing TOML")?;
        if let Ok(url) = std::env::var(ENV_IDMEFV2_URL) {
            if !url.trim().is_empty() {
                cfg.idmefv2.url = url.trim().to_string();
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn mode(&self) -> InputMode {
        self.connector
            .mode
            .unwrap_or_else(|| self.connector.kind.default_mode())
    }

    pub fn push_addr(&self) -> Result<SocketAddr> {
        let addr = format!(
            "{}:{}",
            self.connector.listen_address, self.connector.listen_port
        );
        addr.parse()
            .with_context(|| format!("invalid listen address {addr}"))
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.idmefv2.url.trim();
        if url.is_empty() {
            bail!("[idmefv2].url is required (or set {ENV_IDMEFV2_URL})");
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("[idmefv2].url must be an http(s) URL, got '{url}'");
        }

        let kind = self.connector.kind;
        let mode = self.mode();
        if !kind.supports(mode) {
            let supported: Vec<String> = kind.modes().iter().map(|m| m.to_string()).collect();
            bail!(
                "connector {kind} does not support mode {mode} (supported: {})",
                supported.join(", ")
            );
        }
        if kind == ConnectorKind::Generic && self.connector.template.is_none() {
            bail!("generic connector needs [connector].template");
        }

        match mode {
            InputMode::Tail if self.connector.logfile.is_none() => {
                bail!("mode tail needs [connector].logfile")
            }
            InputMode::Socket if self.connector.unixsocket.is_none() => {
                bail!("mode socket needs [connector].unixsocket")
            }
            InputMode::Poll | InputMode::Push if kind == ConnectorKind::Zabbix => {
                if self.zabbix.is_none() {
                    bail!("zabbix connector needs a [zabbix] section");
                }
            }
            InputMode::Poll if self.poll.url.as_deref().map_or(true, str::is_empty) => {
                bail!("mode poll needs [poll].url")
            }
            _ => {}
        }
        if mode == InputMode::Push {
            self.push_addr()?;
        }
        Ok(())
    }
}
