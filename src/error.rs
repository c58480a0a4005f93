//! Error types for the template engine.
//!
//! [`CompileError`] is raised once, at start-up, when a template carries a
//! malformed path. [`EvaluationError`] is a per-item failure: the driver logs
//! it and moves on to the next source object.

use serde_json::Value;
use thiserror::Error;

/// Maximum rendered length of a source object inside diagnostics.
pub const EXCERPT_MAX_CHARS: usize = 160;

/// Errors raised while compiling a template or a path expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A path expression could not be parsed.
    #[error("malformed path '{path}' at {at}: {reason}")]
    MalformedPath {
        /// The offending path expression.
        path: String,
        /// Pointer to the template node holding the path (`/Source/0/IP`).
        at: String,
        /// What the parser rejected.
        reason: String,
    },
}

/// Failure reported by a user-supplied transform.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransformError(pub String);

impl TransformError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    pub fn arity(expected: usize, got: usize) -> Self {
        Self(format!("expected {expected} argument(s), got {got}"))
    }

    pub fn unexpected(what: &str, got: &Value) -> Self {
        Self(format!("expected {what}, got {}", excerpt(got)))
    }
}

/// Errors raised while evaluating a compiled template against a source object.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// A referenced path matched nothing in the source object.
    #[error("path '{path}' matched nothing in {excerpt}")]
    PathNotFound { path: String, excerpt: String },

    /// A transform returned an error.
    #[error("transform '{name}' failed on {excerpt}: {source}")]
    Transform {
        name: String,
        excerpt: String,
        #[source]
        source: TransformError,
    },
}

impl EvaluationError {
    /// The path or transform name that caused the failure.
    pub fn culprit(&self) -> &str {
        match self {
            EvaluationError::PathNotFound { path, .. } => path,
            EvaluationError::Transform { name, .. } => name,
        }
    }
}

/// Shortened single-line JSON rendering of `v` for log lines and errors.
pub fn excerpt(v: &Value) -> String {
    let full = v.to_string();
    if full.chars().count() <= EXCERPT_MAX_CHARS {
        return full;
    }
    let mut out: String = full.chars().take(EXCERPT_MAX_CHARS).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn excerpt_keeps_short_values() {
        assert_eq!(excerpt(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn excerpt_truncates_long_values() {
        let long = json!({ "text": "x".repeat(500) });
        let out = excerpt(&long);
        assert_eq!(out.chars().count(), EXCERPT_MAX_CHARS + 1);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn culprit_names_path_or_transform() {
        let e = EvaluationError::PathNotFound {
            path: "$.a".into(),
            excerpt: "{}".into(),
        };
        assert_eq!(e.culprit(), "$.a");

        let e = EvaluationError::Transform {
            name: "to_int".into(),
            excerpt: "{}".into(),
            source: TransformError::new("boom"),
        };
        assert_eq!(e.culprit(), "to_int");
        assert!(e.to_string().contains("boom"));
    }
}
