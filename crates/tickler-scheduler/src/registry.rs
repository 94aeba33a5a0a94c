use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;

/// Future returned by a job handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A job handler: receives the job payload and its due date.
pub type Handler = Arc<dyn Fn(Value, DateTime<Utc>) -> HandlerFuture + Send + Sync>;

/// Name → handler mapping owned by one scheduler instance.
///
/// Recurring wrappers live in their own map so a plain handler and the
/// renewing wrapper for the same name never overwrite each other.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
    recurring: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the handler for `name`. Last writer wins.
    pub fn define(&mut self, name: impl Into<String>, handler: Handler) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn handler(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).cloned()
    }

    pub fn define_recurring(&mut self, name: impl Into<String>, handler: Handler) {
        self.recurring.insert(name.into(), handler);
    }

    pub fn recurring_handler(&self, name: &str) -> Option<Handler> {
        self.recurring.get(name).cloned()
    }

    /// Names with a plain handler, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .field("recurring", &self.recurring.keys().collect::<Vec<_>>())
            .finish()
    }
}
