//! Declarative JSON-to-JSON templates.
//!
//! A [`Template`] describes the shape of a normalized object: literals are
//! copied, paths are looked up in the source object, transforms compute or
//! reformat values. [`compile`] resolves the paths once; [`evaluate`] then
//! builds one output object per source object.
//!
//! ```
//! use idmefv2_connectors::template::{compile, evaluate, Template, Transform};
//! use serde_json::json;
//!
//! let sev = Transform::lookup(
//!     "sev_to_text",
//!     [(json!(1), json!("Info")), (json!(3), json!("Medium"))],
//!     None,
//! );
//! let t = Template::map([("Priority", Template::call(sev, ["$.alert.severity".into()]))]);
//! let out = evaluate(&compile(&t).unwrap(), &json!({"alert": {"severity": 3}})).unwrap();
//! assert_eq!(out, json!({"Priority": "Medium"}));
//! ```

pub mod compile;
pub mod eval;
pub mod path;

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::TransformError;

pub use compile::{compile, CompiledTemplate};
pub use eval::evaluate;
pub use path::JsonPath;

/// Leading character marking a string as a path expression.
pub const PATH_SIGIL: char = '$';

type TransformFn = dyn Fn(&[Value]) -> Result<Value, TransformError> + Send + Sync;

/// A named callable used inside templates.
///
/// The name only serves diagnostics: it shows up in [`EvaluationError`]s and
/// debug output.
///
/// [`EvaluationError`]: crate::error::EvaluationError
#[derive(Clone)]
pub struct Transform {
    name: Cow<'static, str>,
    func: Arc<TransformFn>,
}

impl Transform {
    /// Wraps a positional callable.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Zero-argument transform (fresh ids, wall-clock time, host facts).
    pub fn nullary<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self::new(name, move |args| match args.len() {
            0 => Ok(func()),
            n => Err(TransformError::arity(0, n)),
        })
    }

    /// Single-argument transform.
    pub fn unary<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        Self::new(name, move |args| match args {
            [v] => func(v),
            _ => Err(TransformError::arity(1, args.len())),
        })
    }

    /// Table-driven mapping of one argument. Keys are compared with JSON
    /// equality; an unknown key yields `default`, or an error when there is
    /// none.
    pub fn lookup<I>(name: impl Into<Cow<'static, str>>, table: I, default: Option<Value>) -> Self
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        let table: Vec<(Value, Value)> = table.into_iter().collect();
        Self::unary(name, move |key| {
            table
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .or_else(|| default.clone())
                .ok_or_else(|| TransformError::new(format!("no mapping for {key}")))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, TransformError> {
        (self.func)(args)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transform").field(&self.name).finish()
    }
}

/// Uncompiled template node.
///
/// Build it with the typed constructors; the sigil rule (`"$..."` is a path)
/// only applies through [`From<&str>`] and [`Template::from_json`].
#[derive(Debug, Clone)]
pub enum Template {
    Literal(Value),
    Path(String),
    Nullary(Transform),
    Invoke(Transform, Vec<Template>),
    Map(Vec<(String, Template)>),
    Seq(Vec<Template>),
}

impl Template {
    /// A literal, copied verbatim into the output (never read as a path).
    pub fn lit(v: impl Into<Value>) -> Self {
        Template::Literal(v.into())
    }

    pub fn path(expr: impl Into<String>) -> Self {
        Template::Path(expr.into())
    }

    pub fn nullary(t: Transform) -> Self {
        Template::Nullary(t)
    }

    /// Invocation: `args` are evaluated left to right, then passed to `t`.
    pub fn call<const N: usize>(t: Transform, args: [Template; N]) -> Self {
        Template::Invoke(t, args.into())
    }

    pub fn map<const N: usize>(entries: [(&str, Template); N]) -> Self {
        Template::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    pub fn seq<const N: usize>(items: [Template; N]) -> Self {
        Template::Seq(items.into())
    }

    /// Reads a plain JSON document as a template: strings starting with `$`
    /// become paths, objects and arrays recurse, everything else is literal.
    pub fn from_json(v: Value) -> Self {
        match v {
            Value::String(s) if s.starts_with(PATH_SIGIL) => Template::Path(s),
            Value::Object(map) => Template::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Template::from_json(v)))
                    .collect(),
            ),
            Value::Array(items) => {
                Template::Seq(items.into_iter().map(Template::from_json).collect())
            }
            other => Template::Literal(other),
        }
    }
}

impl From<&str> for Template {
    fn from(s: &str) -> Self {
        if s.starts_with(PATH_SIGIL) {
            Template::Path(s.to_string())
        } else {
            Template::Literal(Value::String(s.to_string()))
        }
    }
}

impl From<Transform> for Template {
    fn from(t: Transform) -> Self {
        Template::Nullary(t)
    }
}

impl From<Value> for Template {
    fn from(v: Value) -> Self {
        Template::from_json(v)
    }
}
