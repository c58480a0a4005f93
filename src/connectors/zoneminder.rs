//! ZoneMinder video surveillance events.
//!
//! Input is the flat token dictionary of a ZoneMinder filter (`EN` event
//! name, `ET` event time, `ED` event cause, ...), one JSON object per line.

use serde_json::json;

use super::IDMEFV2_VERSION;
use crate::converter::Converter;
use crate::error::CompileError;
use crate::template::Template;
use crate::transforms::{iso_timestamp_or_now, uuid};

pub fn template() -> Template {
    Template::map([
        ("Version", Template::lit(IDMEFV2_VERSION)),
        ("ID", uuid().into()),
        ("CreateTime", Template::call(iso_timestamp_or_now(), ["$.ET".into()])),
        ("Category", Template::lit(json!(["Intrusion.Burglary"]))),
        ("Priority", "High".into()),
        ("Description", "$.ED".into()),
        (
            "Analyzer",
            Template::lit(json!({
                "IP": "127.0.0.1",
                "Name": "zoneminder",
                "Model": "Zoneminder video surveillance system",
                "Category": ["ODC"],
                "Data": ["Images"],
                "Method": ["Movement"],
            })),
        ),
    ])
}

pub fn converter() -> Result<Converter, CompileError> {
    Converter::new(&template())
}
