//! ModSecurity WAF, JSON audit log entries.

use chrono::{Local, NaiveDateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::IDMEFV2_VERSION;
use crate::converter::Converter;
use crate::error::CompileError;
use crate::template::{Template, Transform};
use crate::transforms::{field_or, local_ip, uuid};

static EXPLOIT_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)sql|xss|rce|attack-(?:lfi|rfi|injection)|protocol").unwrap()
});

/// `Mon Feb  2 12:40:01 2026`, read as local time. Unparsable stamps fall
/// back to now.
pub fn timestamp() -> Transform {
    Transform::unary("modsecurity_timestamp", |v| {
        let parsed = v
            .as_str()
            .and_then(|s| NaiveDateTime::parse_from_str(s.trim(), "%a %b %e %H:%M:%S %Y").ok())
            .and_then(|naive| Local.from_local_datetime(&naive).earliest());
        Ok(json!(parsed.unwrap_or_else(Local::now).to_rfc3339()))
    })
}

/// Syslog-style 0..7 levels, numeric or by name.
pub fn severity() -> Transform {
    Transform::unary("modsecurity_severity", |v| {
        let level = match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(n) => Some(n),
                Err(_) => syslog_level(&s.to_ascii_lowercase()),
            },
            _ => None,
        };
        Ok(json!(match level {
            Some(0..=3) => "High",
            Some(4) => "Medium",
            Some(5) => "Low",
            Some(6 | 7) => "Info",
            _ => "Unknown",
        }))
    })
}

fn syslog_level(name: &str) -> Option<i64> {
    Some(match name {
        "emergency" => 0,
        "alert" => 1,
        "critical" => 2,
        "error" => 3,
        "warning" => 4,
        "notice" => 5,
        "info" => 6,
        "debug" => 7,
        _ => return None,
    })
}

/// Rule tags to IDMEFv2 category.
pub fn category() -> Transform {
    Transform::unary("modsecurity_category", |v| {
        let exploit = v
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .any(|tag| EXPLOIT_TAG.is_match(tag));
        Ok(if exploit {
            json!(["Attempt.Exploit"])
        } else {
            json!(["Other.Uncategorised"])
        })
    })
}

pub fn template() -> Result<Template, CompileError> {
    let first_message = field_or("$[0].message", json!("Unknown"))?;
    let first_severity = field_or("$[0].details.severity", json!("UNKNOWN"))?;
    let first_tags = field_or("$[0].details.tags", json!([]))?;

    Ok(Template::map([
        ("Version", Template::lit(IDMEFV2_VERSION)),
        ("ID", uuid().into()),
        ("CreateTime", Template::call(timestamp(), ["$.transaction.time_stamp".into()])),
        (
            "Category",
            Template::call(
                category(),
                [Template::call(first_tags, ["$.transaction.messages".into()])],
            ),
        ),
        (
            "Priority",
            Template::call(
                severity(),
                [Template::call(first_severity, ["$.transaction.messages".into()])],
            ),
        ),
        (
            "Description",
            Template::call(first_message, ["$.transaction.messages".into()]),
        ),
        (
            "Analyzer",
            Template::map([
                ("IP", local_ip().into()),
                ("Name", "modsecurity".into()),
                ("Model", "ModSecurity WAF".into()),
                ("Type", "Cyber".into()),
                ("Category", Template::lit(json!(["WAF"]))),
                ("Data", Template::lit(json!(["Application"]))),
                ("Method", Template::lit(json!(["Signature"]))),
            ]),
        ),
        (
            "Source",
            Template::seq([Template::map([(
                "IP",
                Template::call(
                    field_or("$.client_ip", json!("0.0.0.0"))?,
                    ["$.transaction".into()],
                ),
            )])]),
        ),
        (
            "Target",
            Template::seq([Template::map([
                (
                    "IP",
                    Template::call(
                        field_or("$.host_ip", json!("0.0.0.0"))?,
                        ["$.transaction".into()],
                    ),
                ),
                (
                    "URL",
                    Template::call(
                        field_or("$.request.uri", json!(""))?,
                        ["$.transaction".into()],
                    ),
                ),
            ])]),
        ),
    ]))
}

/// Entries that triggered at least one rule.
pub fn filter(src: &Value) -> bool {
    src.pointer("/transaction/messages")
        .and_then(Value::as_array)
        .is_some_and(|m| !m.is_empty())
}

pub fn converter() -> Result<Converter, CompileError> {
    Ok(Converter::new(&template()?)?.with_filter(filter))
}
