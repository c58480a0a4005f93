//! Wazuh HIDS, file-integrity (syscheck) alerts.

use serde_json::{json, Value};

use super::IDMEFV2_VERSION;
use crate::converter::Converter;
use crate::error::CompileError;
use crate::template::{Template, Transform};
use crate::transforms::{as_i64, iso_timestamp, prefix, to_int, uuid};

/// Wazuh rule level (0..15) to IDMEFv2 priority.
pub fn rule_level() -> Transform {
    Transform::unary("wazuh_level", |v| {
        let level = as_i64(v).unwrap_or(0);
        Ok(json!(match level {
            l if l <= 0 => "Unknown",
            1..=3 => "Info",
            4..=6 => "Low",
            7..=10 => "Medium",
            _ => "High",
        }))
    })
}

pub fn template() -> Template {
    Template::map([
        ("Version", Template::lit(IDMEFV2_VERSION)),
        ("ID", uuid().into()),
        ("CreateTime", Template::call(iso_timestamp(), ["$.timestamp".into()])),
        ("Category", Template::lit(json!(["Information.UnauthorizedModification"]))),
        ("Priority", Template::call(rule_level(), ["$.rule.level".into()])),
        ("Description", "$.rule.description".into()),
        (
            "Analyzer",
            Template::map([
                ("IP", "$.agent.ip".into()),
                ("Name", "$.agent.name".into()),
                ("Model", "Wazuh".into()),
                ("Type", "Cyber".into()),
                ("Category", Template::lit(json!(["HIDS"]))),
                ("Data", Template::lit(json!(["File"]))),
                ("Method", Template::lit(json!(["Integrity"]))),
            ]),
        ),
        (
            "Attachment",
            Template::seq([Template::map([
                ("Name", "syscheck".into()),
                ("FileName", "$.syscheck.path".into()),
                (
                    "Hash",
                    Template::seq([
                        Template::call(prefix("sha-1:"), ["$.syscheck.sha1_after".into()]),
                        Template::call(prefix("sha-256:"), ["$.syscheck.sha256_after".into()]),
                    ]),
                ),
                ("Size", Template::call(to_int(), ["$.syscheck.size_after".into()])),
            ])]),
        ),
    ])
}

pub fn filter(src: &Value) -> bool {
    src.get("syscheck").is_some()
}

pub fn converter() -> Result<Converter, CompileError> {
    Ok(Converter::new(&template())?.with_filter(filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn agent_lifecycle_events_are_ignored() {
        let src = fixture(include_str!("../../tests/fixtures/wazuh_agent_started.json"));
        let (ok, _) = converter().unwrap().convert(&src).unwrap();
        assert!(!ok);
    }

    #[test]
    fn file_added() {
        let src = fixture(include_str!("../../tests/fixtures/wazuh_file_added.json"));
        let (ok, out) = converter().unwrap().convert(&src).unwrap();
        assert!(ok);
        assert_eq!(out["Priority"], "Low");
        assert_eq!(out["Attachment"][0]["Size"], 29);
        assert_eq!(out["Analyzer"]["IP"], "172.18.0.2");
        assert_eq!(out["CreateTime"], "2025-04-16T09:03:38.791+00:00");
    }

    #[test]
    fn file_modified() {
        let src = fixture(include_str!("../../tests/fixtures/wazuh_file_modified.json"));
        let (ok, out) = converter().unwrap().convert(&src).unwrap();
        assert!(ok);
        assert_eq!(out["Priority"], "Medium");
        assert_eq!(out["Attachment"][0]["Size"], 58);
        assert_eq!(
            out["Attachment"][0]["Hash"][0],
            "sha-1:1309c4731b430cbab6c0bcf52f1869bec42993ce"
        );
    }

    #[test]
    fn syscheck_without_agent_ip_is_an_evaluation_error() {
        let mut src = fixture(include_str!("../../tests/fixtures/wazuh_file_added.json"));
        src["agent"].as_object_mut().unwrap().remove("ip");
        let err = converter().unwrap().convert(&src).unwrap_err();
        assert_eq!(err.culprit(), "$.agent.ip");
    }
}
