//! Configuration document model.
//!
//! The config file is TOML with two top-level lists: `exchanges` (bindings)
//! and `tasks` (task definitions). This module only parses the document into
//! its in-memory form; semantic validation (dependency graph, expression
//! syntax) happens when the engine builds `TaskDef`s from it.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;

use crate::Result;

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(toml::from_str(&fs::read_to_string(path)?)?)
    }
}

/// An exchange binding: credential material plus free-form options passed
/// through to the client. Immutable after load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    pub api_key: Option<String>,
    pub secret: Option<String>,
    /// Some venues require a third credential (e.g. an API passphrase).
    pub password: Option<String>,
    #[serde(default)]
    pub options: toml::Table,
}

impl ExchangeConfig {
    /// String-valued option lookup.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}

/// A raw task definition as written in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,

    // Fetch tasks: which exchange to call and how.
    pub exchange: Option<String>,
    pub function: Option<String>,
    #[serde(default)]
    pub args: Vec<toml::Value>,
    #[serde(default)]
    pub kwargs: toml::Table,
    /// Legacy shorthand: a single scalar or list folds into `args`, a table
    /// folds into `kwargs`.
    pub params: Option<toml::Value>,

    // Derived tasks: upstream task names and the optional own timer.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Execution interval in seconds. Absent for cascade-driven tasks.
    pub interval: Option<u64>,
    /// Cache time-to-live in seconds; falls back to the process default.
    pub ttl: Option<u64>,

    // Expressions and follow-up actions.
    #[serde(rename = "return")]
    pub return_expr: Option<String>,
    pub condition: Option<String>,
    pub log: Option<String>,
    pub action: Option<String>,
}

impl TaskConfig {
    /// Positional arguments with the `params` shorthand folded in.
    pub fn effective_args(&self) -> Vec<JsonValue> {
        let mut args: Vec<JsonValue> = self.args.iter().map(toml_to_json).collect();
        match &self.params {
            Some(toml::Value::Array(list)) => args.extend(list.iter().map(toml_to_json)),
            Some(toml::Value::Table(_)) | None => {}
            Some(scalar) => args.push(toml_to_json(scalar)),
        }
        args
    }

    /// Keyword arguments with the `params` shorthand folded in.
    pub fn effective_kwargs(&self) -> serde_json::Map<String, JsonValue> {
        let mut kwargs: serde_json::Map<String, JsonValue> = self
            .kwargs
            .iter()
            .map(|(k, v)| (k.clone(), toml_to_json(v)))
            .collect();
        if let Some(toml::Value::Table(table)) = &self.params {
            for (k, v) in table {
                kwargs.insert(k.clone(), toml_to_json(v));
            }
        }
        kwargs
    }
}

/// Convert a TOML value to the JSON value model used everywhere downstream.
pub(crate) fn toml_to_json(value: &toml::Value) -> JsonValue {
    match value {
        toml::Value::String(s) => JsonValue::String(s.clone()),
        toml::Value::Integer(i) => JsonValue::from(*i),
        toml::Value::Float(f) => {
            serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
        }
        toml::Value::Boolean(b) => JsonValue::Bool(*b),
        toml::Value::Datetime(dt) => JsonValue::String(dt.to_string()),
        toml::Value::Array(list) => JsonValue::Array(list.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => JsonValue::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}
