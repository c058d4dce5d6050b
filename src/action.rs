//! Action dispatch.
//!
//! An action is an externally supplied handler invoked when a task's
//! condition holds. Handlers implement [`ActionHandler`] and are registered
//! under a reference string; task configs name that reference in their
//! `action` field. Dispatch is fire-and-forget: the handler runs as a
//! detached tokio task, its failure is logged inside that task, and the
//! scheduler never waits for it, so a broken action cannot stall or abort
//! future ticks.
//!
//! Registering a handler under an existing reference replaces the previous
//! one.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, error};

use crate::exchange::ExchangeClient;

#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Everything a handler gets to see: the triggering task, the tick's
/// variable bindings, and the task's exchange client if it has one.
#[derive(Clone)]
pub struct ActionContext {
    pub task: String,
    pub values: HashMap<String, Value>,
    pub exchange: Option<Arc<dyn ExchangeClient>>,
}

impl ActionContext {
    /// The context as a JSON object, for handlers that ship it somewhere.
    pub fn to_json(&self) -> Value {
        json!({
            "task": self.task,
            "values": self.values.clone().into_iter().collect::<serde_json::Map<_, _>>(),
        })
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("task", &self.task)
            .field("values", &self.values)
            .field(
                "exchange",
                &self.exchange.as_ref().map(|e| e.name().to_string()),
            )
            .finish()
    }
}

/// A registered action capability.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn run(&self, ctx: ActionContext) -> Result<(), ActionError>;
}

/// Reference -> handler map.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. An existing handler under the same reference is
    /// replaced.
    pub fn register(&self, reference: &str, handler: Arc<dyn ActionHandler>) {
        let previous = self
            .handlers
            .write()
            .expect("action registry lock poisoned")
            .insert(reference.to_string(), handler);
        if previous.is_some() {
            debug!(action = reference, "action handler replaced");
        }
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.handlers
            .read()
            .expect("action registry lock poisoned")
            .contains_key(reference)
    }

    /// Resolve and invoke a handler as a detached unit of work. Returns the
    /// join handle for callers that want to observe completion (tests); the
    /// scheduler ignores it.
    pub fn dispatch(&self, reference: &str, ctx: ActionContext) -> Option<tokio::task::JoinHandle<()>> {
        let handler = self
            .handlers
            .read()
            .expect("action registry lock poisoned")
            .get(reference)
            .cloned();

        let Some(handler) = handler else {
            error!(task = %ctx.task, action = reference, "no handler registered for action");
            return None;
        };

        let reference = reference.to_string();
        Some(tokio::spawn(async move {
            debug!(task = %ctx.task, action = %reference, "dispatching action");
            let task = ctx.task.clone();
            if let Err(err) = handler.run(ctx).await {
                error!(task = %task, action = %reference, error = %err, "action failed");
            }
        }))
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().expect("action registry lock poisoned");
        f.debug_struct("ActionRegistry")
            .field("handlers", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Built-in handler that just logs the context. Useful as a config
/// placeholder while wiring real actions.
pub struct LogAction;

#[async_trait]
impl ActionHandler for LogAction {
    async fn run(&self, ctx: ActionContext) -> Result<(), ActionError> {
        tracing::info!(task = %ctx.task, context = %ctx.to_json(), "action triggered");
        Ok(())
    }
}

/// Built-in handler that posts the context as JSON to a fixed URL.
pub struct WebhookAction {
    url: String,
    http: reqwest::Client,
}

impl WebhookAction {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ActionHandler for WebhookAction {
    async fn run(&self, ctx: ActionContext) -> Result<(), ActionError> {
        let response = self
            .http
            .post(&self.url)
            .json(&ctx.to_json())
            .send()
            .await
            .map_err(|e| ActionError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ActionError::Failed(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
