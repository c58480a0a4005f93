//! Template evaluation against one source object.

use serde_json::{Map, Value};

use super::compile::CompiledTemplate;
use crate::error::{excerpt, EvaluationError};

/// Builds the output value for `source`.
///
/// Siblings and invocation arguments are evaluated strictly left to right.
/// The first failure aborts the whole evaluation: no partially built object
/// is ever returned.
///
/// # Errors
///
/// [`EvaluationError::PathNotFound`] when a path matches nothing,
/// [`EvaluationError::Transform`] when a transform fails.
pub fn evaluate(template: &CompiledTemplate, source: &Value) -> Result<Value, EvaluationError> {
    match template {
        CompiledTemplate::Literal(v) => Ok(v.clone()),
        CompiledTemplate::Query(path) => {
            path.first(source)
                .cloned()
                .ok_or_else(|| EvaluationError::PathNotFound {
                    path: path.to_string(),
                    excerpt: excerpt(source),
                })
        }
        CompiledTemplate::Nullary(t) => t.call(&[]).map_err(|e| EvaluationError::Transform {
            name: t.name().to_string(),
            excerpt: excerpt(source),
            source: e,
        }),
        CompiledTemplate::Invoke(t, args) => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, source))
                .collect::<Result<Vec<_>, _>>()?;
            t.call(&values).map_err(|e| EvaluationError::Transform {
                name: t.name().to_string(),
                excerpt: excerpt(source),
                source: e,
            })
        }
        CompiledTemplate::Map(entries) => {
            let mut out = Map::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k.clone(), evaluate(v, source)?);
            }
            Ok(Value::Object(out))
        }
        CompiledTemplate::Seq(items) => items
            .iter()
            .map(|item| evaluate(item, source))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{compile, Template, Transform};
    use serde_json::json;

    fn run(t: Template, src: Value) -> Result<Value, EvaluationError> {
        evaluate(&compile(&t).unwrap(), &src)
    }

    #[test]
    fn raw_literal() {
        let out = run(Template::map([("foo", "bar".into())]), json!({"a": 1})).unwrap();
        assert_eq!(out, json!({"foo": "bar"}));
    }

    #[test]
    fn path_lookup() {
        let out = run(Template::map([("foo", "$.a".into())]), json!({"a": 1})).unwrap();
        assert_eq!(out, json!({"foo": 1}));
    }

    #[test]
    fn nullary_function() {
        let foobar = Transform::nullary("foobar", || json!("FOOBAR"));
        let out = run(Template::map([("foo", foobar.into())]), json!({"a": 1})).unwrap();
        assert_eq!(out, json!({"foo": "FOOBAR"}));
    }

    #[test]
    fn deep_nesting() {
        let foobar = Transform::nullary("foobar", || json!("FOOBAR"));
        let t = Template::map([
            ("foo", Template::map([("bar", "$.a".into())])),
            ("baz", Template::seq(["bar".into(), foobar.into()])),
        ]);
        let out = run(t, json!({"a": 1})).unwrap();
        assert_eq!(out, json!({"foo": {"bar": 1}, "baz": ["bar", "FOOBAR"]}));
    }

    #[test]
    fn invocation_reformats_extracted_value() {
        let suffix = Transform::unary("conv_datetime", |v| {
            Ok(json!(format!("{}_FOO", v.as_str().unwrap_or_default())))
        });
        let t = Template::map([("foo", Template::call(suffix, ["$.timestamp".into()]))]);
        let out = run(t, json!({"timestamp": "AAA"})).unwrap();
        assert_eq!(out, json!({"foo": "AAA_FOO"}));
    }

    #[test]
    fn nested_invocation() {
        let first = Transform::unary("first", |v| Ok(v[0].clone()));
        let upper = Transform::unary("upper", |v| {
            Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
        });
        let t = Template::call(upper, [Template::call(first, ["$.tags".into()])]);
        let out = run(t, json!({"tags": ["sqli", "xss"]})).unwrap();
        assert_eq!(out, json!("SQLI"));
    }

    #[test]
    fn missing_path_is_an_error() {
        let err = run(Template::map([("foo", "$.b".into())]), json!({"a": 1})).unwrap_err();
        match err {
            EvaluationError::PathNotFound { path, excerpt } => {
                assert_eq!(path, "$.b");
                assert_eq!(excerpt, r#"{"a":1}"#);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn transform_failure_names_the_transform() {
        let fail = Transform::unary("to_int", |_| Err(crate::error::TransformError::new("nope")));
        let err = run(Template::call(fail, ["$.a".into()]), json!({"a": "x"})).unwrap_err();
        assert_eq!(err.culprit(), "to_int");
    }
}
