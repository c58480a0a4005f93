//! Connector for tools without a built-in integration: the template is a
//! plain JSON document where strings starting with `$` are paths.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::converter::Converter;
use crate::template::Template;

/// Loads a JSON template from `path` and compiles it.
pub fn converter_from_file(path: &Path) -> Result<Converter> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading template {}", path.display()))?;
    let doc: Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing template {}", path.display()))?;
    anyhow::ensure!(
        doc.is_object(),
        "template {} must be a JSON object",
        path.display()
    );
    let conv = Converter::new(&Template::from_json(doc))
        .with_context(|| format!("compiling template {}", path.display()))?;
    Ok(conv)
}
