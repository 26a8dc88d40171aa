//! Job handler registry: maps a job type name to the function that runs it.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::job::Payload;

/// Failure reported by a job-type handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why executing a job did not produce a result.
///
/// Both kinds feed the same retry/dead-letter policy; the distinction exists
/// for logging and for `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// The capability every job type implements.
pub trait JobHandler: Send + Sync {
    fn execute(&self, payload: &Payload) -> Result<Value, HandlerError>;
}

impl<F> JobHandler for F
where
    F: Fn(&Payload) -> Result<Value, HandlerError> + Send + Sync,
{
    fn execute(&self, payload: &Payload) -> Result<Value, HandlerError> {
        self(payload)
    }
}

/// Registry of job handlers.
///
/// Lookup order: exact type name, then category patterns (`"text.*"` matches
/// `"text.reverse"`), then the catch-all `"*"`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_all(&mut registry);
        registry
    }

    /// Register (or replace) the handler for a type name or pattern.
    pub fn register<H>(&mut self, pattern: impl Into<String>, handler: H)
    where
        H: JobHandler + 'static,
    {
        self.handlers.insert(pattern.into(), Arc::new(handler));
    }

    pub fn with<H>(mut self, pattern: impl Into<String>, handler: H) -> Self
    where
        H: JobHandler + 'static,
    {
        self.register(pattern, handler);
        self
    }

    pub fn resolve(&self, job_type: &str) -> Option<&Arc<dyn JobHandler>> {
        if let Some(h) = self.handlers.get(job_type) {
            return Some(h);
        }

        let by_category = self
            .handlers
            .iter()
            .filter_map(|(pattern, h)| {
                let prefix = pattern.strip_suffix(".*")?;
                let rest = job_type.strip_prefix(prefix)?;
                rest.starts_with('.').then_some((prefix.len(), h))
            })
            // Most specific category wins.
            .max_by_key(|(len, _)| *len)
            .map(|(_, h)| h);
        if by_category.is_some() {
            return by_category;
        }

        self.handlers.get("*")
    }

    /// Run the handler for `job_type`. A panicking handler counts as a failure.
    pub fn execute(&self, job_type: &str, payload: &Payload) -> Result<Value, ExecutionError> {
        let handler = self
            .resolve(job_type)
            .ok_or_else(|| ExecutionError::UnknownJobType(job_type.to_string()))?;

        match panic::catch_unwind(AssertUnwindSafe(|| handler.execute(payload))) {
            Ok(outcome) => outcome.map_err(ExecutionError::from),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                Err(HandlerError::new(format!("handler panicked: {detail}")).into())
            }
        }
    }

    pub fn job_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(tag: &'static str) -> impl Fn(&Payload) -> Result<Value, HandlerError> {
        move |_: &Payload| Ok(json!(tag))
    }

    #[test]
    fn exact_match_wins_over_patterns() {
        let registry = HandlerRegistry::new()
            .with("text.reverse", ok("exact"))
            .with("text.*", ok("category"))
            .with("*", ok("wildcard"));

        let out = registry.execute("text.reverse", &Payload::new()).unwrap();
        assert_eq!(out, json!("exact"));
    }

    #[test]
    fn category_handler() {
        let registry = HandlerRegistry::new()
            .with("text.*", ok("text"))
            .with("text.words.*", ok("words"));

        assert_eq!(registry.execute("text.upper", &Payload::new()).unwrap(), json!("text"));
        assert_eq!(
            registry.execute("text.words.count", &Payload::new()).unwrap(),
            json!("words")
        );
        // "textual.upper" must not match the "text" category.
        assert!(registry.resolve("textual.upper").is_none());
    }

    #[test]
    fn wildcard_handler() {
        let registry = HandlerRegistry::new().with("*", ok("any"));
        assert_eq!(registry.execute("anything", &Payload::new()).unwrap(), json!("any"));
    }

    #[test]
    fn unknown_type_is_a_distinct_error_kind() {
        let registry = HandlerRegistry::new();
        let err = registry.execute("unknown.kind", &Payload::new()).unwrap_err();

        assert_eq!(err, ExecutionError::UnknownJobType("unknown.kind".into()));
        assert_eq!(err.to_string(), "unknown job type: unknown.kind");
    }

    #[test]
    fn handler_error_renders_its_message() {
        let registry = HandlerRegistry::new()
            .with("fail", |_: &Payload| Err::<Value, _>(HandlerError::new("bad input")));

        let err = registry.execute("fail", &Payload::new()).unwrap_err();
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn panicking_handler_is_contained() {
        let registry = HandlerRegistry::new().with("boom", |_: &Payload| -> Result<Value, HandlerError> {
            panic!("kaboom")
        });

        let err = registry.execute("boom", &Payload::new()).unwrap_err();
        assert!(matches!(err, ExecutionError::Handler(_)));
        assert!(err.to_string().contains("kaboom"));
    }
}
