//! Kismet wireless IDS alerts, polled from the REST API.
//!
//! Kismet re-emits the same alert with jittered timestamps, so besides the
//! strict fingerprint the sighting cache runs a fuzzy layer keyed on
//! header + text.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::IDMEFV2_VERSION;
use crate::converter::Converter;
use crate::driver::poll::PollSource;
use crate::error::{CompileError, TransformError};
use crate::sighting::{FuzzyConfig, SightingConfig};
use crate::template::{Template, Transform};
use crate::transforms::{as_i64, epoch_to_utc, local_ip, uuid};

const TIMESTAMP: &str = r#"$."kismet.alert.timestamp""#;
const HEADER: &str = r#"$."kismet.alert.header""#;
const TEXT: &str = r#"$."kismet.alert.text""#;

/// Default near-duplicate window.
pub const FUZZY_WINDOW: Duration = Duration::from_secs(2);

/// Epoch seconds to RFC 3339; strings pass through unchanged.
pub fn timestamp() -> Transform {
    Transform::unary("kismet_timestamp", |v| match v {
        Value::Number(n) => Ok(json!(n
            .as_f64()
            .and_then(epoch_to_utc)
            .unwrap_or_else(chrono::Utc::now)
            .to_rfc3339())),
        Value::String(s) => Ok(json!(s)),
        other => Err(TransformError::unexpected("epoch timestamp", other)),
    })
}

/// Kismet severity (0..20) in bands of five.
pub fn severity() -> Transform {
    Transform::unary("kismet_severity", |v| {
        Ok(json!(match as_i64(v) {
            None => "Unknown",
            Some(s) if s < 5 => "Info",
            Some(s) if s < 10 => "Low",
            Some(s) if s < 15 => "Medium",
            Some(_) => "High",
        }))
    })
}

/// `MAC: <mac> - <text>`.
pub fn mac_note() -> Transform {
    Transform::new("mac_note", |args| match args {
        [mac, note] => {
            let mac = match mac.as_str() {
                Some("") | None => "00:00:00:00:00:00",
                Some(m) => m,
            };
            Ok(json!(format!("MAC: {mac} - {}", note.as_str().unwrap_or_default())))
        }
        _ => Err(TransformError::arity(2, args.len())),
    })
}

pub fn template() -> Template {
    Template::map([
        ("Version", Template::lit(IDMEFV2_VERSION)),
        ("ID", uuid().into()),
        ("CreateTime", Template::call(timestamp(), [TIMESTAMP.into()])),
        ("Category", Template::lit(json!(["Recon.Sniffing"]))),
        (
            "Priority",
            Template::call(severity(), [r#"$."kismet.alert.severity""#.into()]),
        ),
        ("Description", HEADER.into()),
        (
            "Analyzer",
            Template::map([
                ("IP", local_ip().into()),
                ("Name", "kismet".into()),
                ("Model", "Kismet Wireless IDS".into()),
                ("Type", "Cyber".into()),
                ("Category", Template::lit(json!(["NIDS", "WIDS"]))),
                ("Data", Template::lit(json!(["Network"]))),
                ("Method", Template::lit(json!(["Monitor"]))),
            ]),
        ),
        (
            "Source",
            Template::seq([Template::map([(
                "Note",
                Template::call(
                    mac_note(),
                    [r#"$."kismet.alert.source_mac""#.into(), TEXT.into()],
                ),
            )])]),
        ),
    ])
}

pub fn converter() -> Result<Converter, CompileError> {
    Converter::new(&template())
}

pub fn sighting(window: Duration) -> SightingConfig {
    SightingConfig::new([TIMESTAMP, HEADER, TEXT]).with_fuzzy(FuzzyConfig {
        key: vec![HEADER.into(), TEXT.into()],
        timestamp: TIMESTAMP.into(),
        window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(2)),
    })
}

/// Polls a Kismet alert endpoint returning a plain JSON list.
pub struct KismetSource {
    url: String,
    client: Client,
    credentials: Option<(String, String)>,
    timeout: Duration,
}

impl KismetSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            credentials: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }
}

#[async_trait]
impl PollSource for KismetSource {
    async fn fetch(&self) -> Result<Vec<Value>> {
        let mut req = self.client.get(&self.url).timeout(self.timeout);
        if let Some((user, password)) = &self.credentials {
            req = req.basic_auth(user, Some(password));
        }
        let body: Value = req
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()?
            .json()
            .await
            .context("decoding Kismet alerts")?;
        match body {
            Value::Array(items) => Ok(items),
            other => {
                tracing::warn!(response = %crate::error::excerpt(&other), "unexpected Kismet response (not a list)");
                Ok(Vec::new())
            }
        }
    }

    fn name(&self) -> &'static str {
        "kismet"
    }
}
