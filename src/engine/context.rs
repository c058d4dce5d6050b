//! Per-tick variable bindings.
//!
//! An [`ExecutionContext`] is built fresh for every evaluation and discarded
//! at the end of the tick. It binds each name in the task's transitive
//! dependency closure to its currently valid cached value (stale entries are
//! simply absent), plus the task's own pending value once computed.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::cache::ResultCache;
use crate::core::{TaskDef, TaskGraph};

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Bind every valid cached value from the task's dependency closure.
    /// Each dependency is read under its own producer's TTL.
    pub(crate) fn for_task(
        graph: &TaskGraph,
        cache: &ResultCache,
        task: &TaskDef,
        now: DateTime<Utc>,
    ) -> Self {
        let mut ctx = Self::default();
        if let Some(closure) = graph.closure_of(&task.name) {
            for dep in closure {
                let ttl = graph.task(dep).map(|d| d.ttl).unwrap_or(task.ttl);
                if let Some(value) = cache.get(dep, now, ttl) {
                    ctx.bind(dep, value);
                }
            }
        }
        ctx
    }

    pub fn bind(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// The raw binding map, as consumed by expression evaluation, log
    /// templates, and action contexts.
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn into_values(self) -> HashMap<String, Value> {
        self.values
    }
}
