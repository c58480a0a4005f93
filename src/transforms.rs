//! Stock transforms shared by the source-tool templates.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::error::{CompileError, TransformError};
use crate::template::{JsonPath, Transform};

/// Fresh UUIDv4, hyphenated.
pub fn uuid() -> Transform {
    Transform::nullary("uuid", || json!(uuid::Uuid::new_v4().to_string()))
}

/// Current local time, RFC 3339.
pub fn now() -> Transform {
    Transform::nullary("now", || json!(Local::now().to_rfc3339()))
}

/// Address of the interface used for outbound traffic.
pub fn local_ip() -> Transform {
    Transform::nullary("local_ip", || json!(outbound_ip().to_string()))
}

/// Parses an ISO-8601 timestamp (`Z`, `+hh:mm`, `+hhmm` or no offset, which
/// is read as UTC) and re-emits it as RFC 3339, keeping the original offset.
pub fn iso_timestamp() -> Transform {
    Transform::unary("iso_timestamp", |v| {
        let s = v
            .as_str()
            .ok_or_else(|| TransformError::unexpected("timestamp string", v))?;
        parse_timestamp(s)
            .map(|dt| json!(dt.to_rfc3339()))
            .ok_or_else(|| TransformError::new(format!("unparsable timestamp '{s}'")))
    })
}

/// Like [`iso_timestamp`], but falls back to the current UTC time.
pub fn iso_timestamp_or_now() -> Transform {
    Transform::unary("iso_timestamp_or_now", |v| {
        let dt = v
            .as_str()
            .and_then(parse_timestamp)
            .unwrap_or_else(|| Utc::now().fixed_offset());
        Ok(json!(dt.to_rfc3339()))
    })
}

/// Epoch seconds (integer, float or numeric string) to UTC RFC 3339.
pub fn epoch_to_iso() -> Transform {
    Transform::unary("epoch_to_iso", |v| {
        let secs = as_f64(v).ok_or_else(|| TransformError::unexpected("epoch seconds", v))?;
        epoch_to_utc(secs)
            .map(|dt| json!(dt.to_rfc3339()))
            .ok_or_else(|| TransformError::new(format!("epoch {secs} out of range")))
    })
}

/// Integer coercion of numbers and numeric strings.
pub fn to_int() -> Transform {
    Transform::unary("to_int", |v| {
        as_i64(v)
            .map(Value::from)
            .ok_or_else(|| TransformError::unexpected("integer", v))
    })
}

/// Prepends `prefix` to a string value.
pub fn prefix(prefix: &'static str) -> Transform {
    Transform::unary("prefix", move |v| {
        let s = v
            .as_str()
            .ok_or_else(|| TransformError::unexpected("string", v))?;
        Ok(json!(format!("{prefix}{s}")))
    })
}

/// Replaces empty strings and nulls by `default`.
pub fn non_empty_or(default: &'static str) -> Transform {
    Transform::unary("non_empty_or", move |v| {
        Ok(match v {
            Value::Null => json!(default),
            Value::String(s) if s.is_empty() => json!(default),
            other => other.clone(),
        })
    })
}

/// Wraps a port as `[port]`, or `[]` when it is not a valid integer.
pub fn listify_port() -> Transform {
    Transform::unary("listify_port", |v| {
        Ok(match as_i64(v) {
            Some(p) => json!([p]),
            None => json!([]),
        })
    })
}

/// Tolerant lookup of an optional field relative to the argument.
///
/// # Errors
///
/// [`CompileError`] when `path` does not parse.
pub fn field_or(path: &str, default: Value) -> Result<Transform, CompileError> {
    let compiled = JsonPath::parse(path).map_err(|reason| CompileError::MalformedPath {
        path: path.to_string(),
        at: "field_or".into(),
        reason,
    })?;
    Ok(Transform::unary(format!("field_or({path})"), move |v| {
        Ok(compiled.first(v).cloned().unwrap_or_else(|| default.clone()))
    }))
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt);
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive).fixed_offset())
}

pub(crate) fn epoch_to_utc(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

pub(crate) fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Local address picked by the routing table for a public destination.
/// No packet is sent: connecting a UDP socket only selects a route.
fn outbound_ip() -> IpAddr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|sock| {
            sock.connect("192.0.2.1:9")?;
            sock.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
