//! Validated task definitions.
//!
//! A [`TaskDef`] is the immutable, load-time-checked form of a
//! [`TaskConfig`](crate::config::TaskConfig): expressions and log templates
//! are parsed here so that every syntax error surfaces at startup, never at
//! some later tick.

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::TaskConfig;
use crate::expr::{Expr, LogTemplate};
use crate::{Error, Result};

/// The remote call a fetch task performs on each trigger.
#[derive(Debug, Clone)]
pub struct FetchSpec {
    /// Remote function identifier, e.g. `fetch_ticker`.
    pub function: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

/// A single task: fetch spec, dependencies, timing, and the expressions
/// evaluated over the execution context. Immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct TaskDef {
    pub name: String,
    /// Exchange binding used for fetches and handed to the task's action.
    /// A binding without a `function` is allowed.
    pub exchange: Option<String>,
    pub fetch: Option<FetchSpec>,
    /// Upstream task names, in declaration order.
    pub dependencies: Vec<String>,
    /// Own timer period. Tasks without one run only via the cascade.
    pub interval: Option<Duration>,
    /// How long this task's cached value stays valid for dependents.
    pub ttl: Duration,
    pub return_expr: Option<Expr>,
    pub condition: Option<Expr>,
    pub log: Option<LogTemplate>,
    /// Action registry reference dispatched when the condition holds.
    pub action: Option<String>,
}

impl TaskDef {
    /// Build and validate a definition from its raw config form.
    ///
    /// # Errors
    /// - `MissingExchange` for a `function` without an `exchange`
    /// - `InvalidInterval` for `interval = 0`
    /// - `Syntax` when a return/condition expression or log template does
    ///   not parse
    pub fn from_config(config: &TaskConfig, default_ttl: Duration) -> Result<Self> {
        let fetch = match (&config.exchange, &config.function) {
            (Some(_), Some(function)) => Some(FetchSpec {
                function: function.clone(),
                args: config.effective_args(),
                kwargs: config.effective_kwargs(),
            }),
            (None, Some(function)) => {
                return Err(Error::MissingExchange {
                    task: config.name.clone(),
                    function: function.clone(),
                });
            }
            // An exchange without a function is allowed: the binding is
            // still handed to the task's action.
            _ => None,
        };

        let interval = match config.interval {
            Some(0) => {
                return Err(Error::InvalidInterval {
                    task: config.name.clone(),
                });
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let syntax = |field: &'static str| {
            let task = config.name.clone();
            move |source: crate::expr::ParseError| Error::Syntax { task, field, source }
        };

        let return_expr = config
            .return_expr
            .as_deref()
            .map(|text| Expr::parse(text).map_err(syntax("return")))
            .transpose()?;
        let condition = config
            .condition
            .as_deref()
            .map(|text| Expr::parse(text).map_err(syntax("condition")))
            .transpose()?;
        let log = config
            .log
            .as_deref()
            .map(|text| LogTemplate::parse(text).map_err(syntax("log")))
            .transpose()?;

        Ok(Self {
            name: config.name.clone(),
            exchange: config.exchange.clone(),
            fetch,
            dependencies: config.dependencies.clone(),
            interval,
            ttl: config.ttl.map(Duration::from_secs).unwrap_or(default_ttl),
            return_expr,
            condition,
            log,
            action: config.action.clone(),
        })
    }

    pub fn has_interval(&self) -> bool {
        self.interval.is_some()
    }

    /// Every name this task's expressions and log template reference.
    /// Used by graph validation to enforce the dependency-closure rule.
    pub fn referenced_names(&self) -> Vec<(&'static str, BTreeSet<String>)> {
        let mut refs = Vec::new();
        if let Some(expr) = &self.return_expr {
            refs.push(("return", expr.variables()));
        }
        if let Some(expr) = &self.condition {
            refs.push(("condition", expr.variables()));
        }
        if let Some(template) = &self.log {
            refs.push(("log", template.variables()));
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> TaskConfig {
        TaskConfig {
            name: name.to_string(),
            ..Default::default()
        }
    }

    const DEFAULT_TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_minimal_task() {
        let mut cfg = config("heartbeat");
        cfg.interval = Some(5);
        let task = TaskDef::from_config(&cfg, DEFAULT_TTL).unwrap();
        assert_eq!(task.interval, Some(Duration::from_secs(5)));
        assert_eq!(task.ttl, DEFAULT_TTL);
        assert!(task.fetch.is_none());
    }

    #[test]
    fn test_ttl_override() {
        let mut cfg = config("fast");
        cfg.interval = Some(1);
        cfg.ttl = Some(3);
        let task = TaskDef::from_config(&cfg, DEFAULT_TTL).unwrap();
        assert_eq!(task.ttl, Duration::from_secs(3));
    }

    #[test]
    fn test_function_requires_exchange() {
        let mut cfg = config("btc");
        cfg.function = Some("fetch_ticker".to_string());
        let err = TaskDef::from_config(&cfg, DEFAULT_TTL).unwrap_err();
        assert!(matches!(err, Error::MissingExchange { .. }));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut cfg = config("spin");
        cfg.interval = Some(0);
        let err = TaskDef::from_config(&cfg, DEFAULT_TTL).unwrap_err();
        assert!(matches!(err, Error::InvalidInterval { .. }));
    }

    #[test]
    fn test_bad_expression_fails_at_load() {
        let mut cfg = config("spread");
        cfg.interval = Some(5);
        cfg.condition = Some("abs(".to_string());
        let err = TaskDef::from_config(&cfg, DEFAULT_TTL).unwrap_err();
        match err {
            Error::Syntax { task, field, .. } => {
                assert_eq!(task, "spread");
                assert_eq!(field, "condition");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_referenced_names() {
        let mut cfg = config("spread");
        cfg.interval = Some(5);
        cfg.return_expr = Some("a - b".to_string());
        cfg.condition = Some("abs(spread) > 100".to_string());
        cfg.log = Some("spread {spread:.2}".to_string());
        let task = TaskDef::from_config(&cfg, DEFAULT_TTL).unwrap();
        let refs = task.referenced_names();
        assert_eq!(refs.len(), 3);
        let (field, vars) = &refs[0];
        assert_eq!(*field, "return");
        assert_eq!(vars.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
