//! Template compilation: path leaves become parsed [`JsonPath`]s, every other
//! node keeps its shape.

use serde_json::Value;

use super::path::JsonPath;
use super::{Template, Transform};
use crate::error::CompileError;

/// A template whose paths have been parsed. Pure data: it can be evaluated
/// against any number of source objects.
#[derive(Debug, Clone)]
pub enum CompiledTemplate {
    Literal(Value),
    Query(JsonPath),
    Nullary(Transform),
    Invoke(Transform, Vec<CompiledTemplate>),
    Map(Vec<(String, CompiledTemplate)>),
    Seq(Vec<CompiledTemplate>),
}

/// Compiles `template`. Never looks at a source object.
///
/// # Errors
///
/// [`CompileError::MalformedPath`] for the first path that does not parse,
/// naming its location in the template.
pub fn compile(template: &Template) -> Result<CompiledTemplate, CompileError> {
    compile_at(template, &mut String::new())
}

fn compile_at(template: &Template, at: &mut String) -> Result<CompiledTemplate, CompileError> {
    Ok(match template {
        Template::Literal(v) => CompiledTemplate::Literal(v.clone()),
        Template::Path(expr) => {
            let path = JsonPath::parse(expr).map_err(|reason| CompileError::MalformedPath {
                path: expr.clone(),
                at: pointer(at),
                reason,
            })?;
            CompiledTemplate::Query(path)
        }
        Template::Nullary(t) => CompiledTemplate::Nullary(t.clone()),
        Template::Invoke(t, args) => {
            let mut compiled = Vec::with_capacity(args.len());
            for (i, arg) in args.iter().enumerate() {
                compiled.push(nested(at, &format!("{}({i})", t.name()), |at| {
                    compile_at(arg, at)
                })?);
            }
            CompiledTemplate::Invoke(t.clone(), compiled)
        }
        Template::Map(entries) => {
            let mut compiled = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                compiled.push((k.clone(), nested(at, k, |at| compile_at(v, at))?));
            }
            CompiledTemplate::Map(compiled)
        }
        Template::Seq(items) => {
            let mut compiled = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                compiled.push(nested(at, &i.to_string(), |at| compile_at(item, at))?);
            }
            CompiledTemplate::Seq(compiled)
        }
    })
}

/// Runs `f` with `segment` appended to the location pointer.
fn nested<T>(at: &mut String, segment: &str, f: impl FnOnce(&mut String) -> T) -> T {
    let len = at.len();
    at.push('/');
    at.push_str(segment);
    let out = f(at);
    at.truncate(len);
    out
}

fn pointer(at: &str) -> String {
    if at.is_empty() {
        "/".to_string()
    } else {
        at.to_string()
    }
}
