//! Filter + template: the per-connector conversion entry point.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{CompileError, EvaluationError};
use crate::template::{compile, evaluate, CompiledTemplate, Template};

type FilterFn = dyn Fn(&Value) -> bool + Send + Sync;

/// Compiled template plus the predicate deciding which source objects are
/// worth converting.
#[derive(Clone)]
pub struct Converter {
    template: CompiledTemplate,
    filter: Option<Arc<FilterFn>>,
}

impl Converter {
    /// Compiles `template`; the resulting converter accepts every object.
    pub fn new(template: &Template) -> Result<Self, CompileError> {
        Ok(Self {
            template: compile(template)?,
            filter: None,
        })
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn accepts(&self, source: &Value) -> bool {
        self.filter.as_ref().map_or(true, |f| f(source))
    }

    /// Filters then evaluates. A rejected object comes back unchanged with
    /// `false`; the evaluator is not run for it.
    pub fn convert(&self, source: &Value) -> Result<(bool, Value), EvaluationError> {
        if !self.accepts(source) {
            return Ok((false, source.clone()));
        }
        evaluate(&self.template, source).map(|v| (true, v))
    }

    pub fn template(&self) -> &CompiledTemplate {
        &self.template
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("template", &self.template)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}
