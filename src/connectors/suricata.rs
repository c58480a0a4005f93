//! Suricata NIDS, EVE JSON records.

use serde_json::{json, Value};

use super::IDMEFV2_VERSION;
use crate::converter::Converter;
use crate::error::CompileError;
use crate::template::{Template, Transform};
use crate::transforms::{as_i64, iso_timestamp, non_empty_or, uuid};

const IGNORED_CATEGORY: &str = "Generic Protocol Command Decode";

/// Rule severity 1..4 to Info..High; above 4 stays High.
pub fn severity() -> Transform {
    Transform::unary("suricata_severity", |v| {
        let sev = as_i64(v).unwrap_or(0);
        Ok(json!(match sev {
            s if s <= 0 => "Unknown",
            1 => "Info",
            2 => "Low",
            3 => "Medium",
            _ => "High",
        }))
    })
}

pub fn template() -> Template {
    Template::map([
        ("Version", Template::lit(IDMEFV2_VERSION)),
        ("ID", uuid().into()),
        ("CreateTime", Template::call(iso_timestamp(), ["$.timestamp".into()])),
        ("Category", Template::lit(json!(["Recon.Scanning"]))),
        ("Priority", Template::call(severity(), ["$.alert.severity".into()])),
        ("Description", "$.alert.category".into()),
        (
            "Analyzer",
            Template::lit(json!({
                "IP": "127.0.0.1",
                "Name": "suricata",
                "Model": "Suricata NIDS",
                "Type": "Cyber",
                "Category": ["NIDS"],
                "Data": ["Network"],
                "Method": ["Signature"],
            })),
        ),
        (
            "Source",
            Template::seq([Template::map([
                ("IP", Template::call(non_empty_or("127.0.0.1"), ["$.src_ip".into()])),
                ("Port", Template::seq(["$.src_port".into()])),
                (
                    "Protocol",
                    Template::seq([Template::call(non_empty_or("UNKNOWN"), ["$.proto".into()])]),
                ),
            ])]),
        ),
        (
            "Target",
            Template::seq([Template::map([
                ("IP", Template::call(non_empty_or("127.0.0.1"), ["$.dest_ip".into()])),
                ("Port", Template::seq(["$.dest_port".into()])),
            ])]),
        ),
    ])
}

/// Alerts only, and not the decoder noise.
pub fn filter(src: &Value) -> bool {
    src.get("event_type").and_then(Value::as_str) == Some("alert")
        && src
            .pointer("/alert/category")
            .and_then(Value::as_str)
            .is_some_and(|c| c != IGNORED_CATEGORY)
}

pub fn converter() -> Result<Converter, CompileError> {
    Ok(Converter::new(&template())?.with_filter(filter))
}
