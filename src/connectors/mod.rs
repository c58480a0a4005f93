// src/connectors/mod.rs
//! Per-tool integrations: one template + filter per source tool, plus the
//! sighting configuration of the polled ones.

pub mod generic;
pub mod kismet;
pub mod modsecurity;
pub mod prometheus;
pub mod suricata;
pub mod wazuh;
pub mod zabbix;
pub mod zoneminder;

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::converter::Converter;

/// IDMEFv2 schema version stamped on every produced alert.
pub const IDMEFV2_VERSION: &str = "2.D.V04";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Suricata,
    Wazuh,
    #[serde(alias = "mod_security")]
    ModSecurity,
    Zoneminder,
    Prometheus,
    Kismet,
    Zabbix,
    Generic,
}

/// How raw alerts reach the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    #[serde(alias = "file", alias = "logfile")]
    Tail,
    #[serde(alias = "unixsocket")]
    Socket,
    #[serde(alias = "polling")]
    Poll,
    Push,
}

impl ConnectorKind {
    pub fn name(self) -> &'static str {
        match self {
            ConnectorKind::Suricata => "suricata",
            ConnectorKind::Wazuh => "wazuh",
            ConnectorKind::ModSecurity => "modsecurity",
            ConnectorKind::Zoneminder => "zoneminder",
            ConnectorKind::Prometheus => "prometheus",
            ConnectorKind::Kismet => "kismet",
            ConnectorKind::Zabbix => "zabbix",
            ConnectorKind::Generic => "generic",
        }
    }

    /// Input modes the integration knows how to run in; the first one is the
    /// default.
    pub fn modes(self) -> &'static [InputMode] {
        use InputMode::*;
        match self {
            ConnectorKind::Suricata => &[Tail, Socket],
            ConnectorKind::Wazuh | ConnectorKind::ModSecurity | ConnectorKind::Zoneminder => {
                &[Tail]
            }
            ConnectorKind::Prometheus | ConnectorKind::Kismet => &[Poll],
            ConnectorKind::Zabbix => &[Poll, Push],
            ConnectorKind::Generic => &[Tail, Socket, Push],
        }
    }

    pub fn supports(self, mode: InputMode) -> bool {
        self.modes().contains(&mode)
    }

    pub fn default_mode(self) -> InputMode {
        self.modes()[0]
    }

    /// Builds the converter for this integration.
    ///
    /// `template` is only read by [`ConnectorKind::Generic`], which has no
    /// built-in template.
    pub fn converter(self, mode: InputMode, template: Option<&Path>) -> Result<Converter> {
        let conv = match self {
            ConnectorKind::Suricata => suricata::converter(),
            ConnectorKind::Wazuh => wazuh::converter(),
            ConnectorKind::ModSecurity => modsecurity::converter(),
            ConnectorKind::Zoneminder => zoneminder::converter(),
            ConnectorKind::Prometheus => prometheus::converter(),
            ConnectorKind::Kismet => kismet::converter(),
            ConnectorKind::Zabbix => zabbix::converter(&[mode_method(mode)]),
            ConnectorKind::Generic => {
                let path = template.context("generic connector needs [connector].template")?;
                return generic::converter_from_file(path);
            }
        };
        conv.with_context(|| format!("compiling {} template", self.name()))
    }
}

fn mode_method(mode: InputMode) -> &'static str {
    match mode {
        InputMode::Push => "push",
        _ => "polling",
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputMode::Tail => "tail",
            InputMode::Socket => "socket",
            InputMode::Poll => "poll",
            InputMode::Push => "push",
        })
    }
}
