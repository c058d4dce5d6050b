//! The monitoring engine.
//!
//! An [`Engine`] owns the validated task graph, the result cache, and the
//! exchange/action registries, and drives everything through per-task
//! timers. All state is explicitly owned here and shared with timer tasks
//! via one `Arc` — there are no process-wide singletons.
//!
//! Construction performs every load-time check (graph validation,
//! expression parsing, exchange resolution), so a started engine can only
//! fail in task-scoped, recoverable ways.

mod context;
mod scheduler;

pub use context::ExecutionContext;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::action::{ActionHandler, ActionRegistry};
use crate::cache::ResultCache;
use crate::config::AppConfig;
use crate::core::{TaskDef, TaskGraph};
use crate::exchange::ExchangeRegistry;
use crate::{Error, Result};

/// Shared state behind the timer tasks.
pub(crate) struct EngineCore {
    pub(crate) graph: TaskGraph,
    pub(crate) cache: ResultCache,
    pub(crate) exchanges: ExchangeRegistry,
    pub(crate) actions: ActionRegistry,
}

pub struct Engine {
    core: Arc<EngineCore>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Build an engine with REST gateway clients for the configured
    /// exchange bindings.
    pub fn new(config: &AppConfig, default_ttl: Duration) -> Result<Self> {
        Self::with_exchanges(
            config,
            ExchangeRegistry::from_configs(&config.exchanges),
            default_ttl,
        )
    }

    /// Build an engine with caller-supplied exchange clients. This is the
    /// seam test doubles and custom transports plug into.
    ///
    /// # Errors
    /// Any configuration validation failure: duplicate/unknown/cyclic/
    /// unreachable tasks, malformed expressions, or a task referencing an
    /// exchange the registry does not contain.
    pub fn with_exchanges(
        config: &AppConfig,
        exchanges: ExchangeRegistry,
        default_ttl: Duration,
    ) -> Result<Self> {
        let tasks: Vec<TaskDef> = config
            .tasks
            .iter()
            .map(|task| TaskDef::from_config(task, default_ttl))
            .collect::<Result<_>>()?;

        for task in &tasks {
            if let Some(exchange) = &task.exchange {
                if !exchanges.contains(exchange) {
                    return Err(Error::UnknownExchange {
                        task: task.name.clone(),
                        exchange: exchange.clone(),
                    });
                }
            }
        }

        let graph = TaskGraph::build(tasks)?;
        info!(
            tasks = graph.len(),
            exchanges = exchanges.len(),
            "engine configured"
        );

        Ok(Self {
            core: Arc::new(EngineCore {
                graph,
                cache: ResultCache::new(),
                exchanges,
                actions: ActionRegistry::new(),
            }),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        })
    }

    /// Register an action handler under a reference tasks can name in
    /// their `action` field. Re-registration replaces the prior handler.
    pub fn register_action(&self, reference: &str, handler: Arc<dyn ActionHandler>) {
        self.core.actions.register(reference, handler);
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.core.graph
    }

    pub fn cache(&self) -> &ResultCache {
        &self.core.cache
    }

    /// Spawn the timer loops. Idempotent concerns are the caller's: call
    /// once. Interval tasks fire their first tick immediately.
    pub fn start(&mut self) {
        let handles = scheduler::spawn_timers(&self.core, &self.cancel);
        info!(timers = handles.len(), "engine started");
        self.handles = handles;
    }

    /// Run one task's full tick (execute + cascade) outside its schedule.
    pub async fn trigger(&self, name: &str) -> Result<()> {
        if self.core.graph.task(name).is_none() {
            return Err(Error::TaskNotFound(name.to_string()));
        }
        scheduler::run_tick(&self.core, name).await;
        Ok(())
    }

    /// Stop scheduling further ticks and wait for in-flight ones to finish.
    /// Exchange calls are never cancelled mid-flight.
    pub async fn shutdown(&mut self) {
        info!("engine shutting down");
        self.cancel.cancel();
        let handles = std::mem::take(&mut self.handles);
        for result in futures::future::join_all(handles).await {
            if let Err(err) = result {
                tracing::warn!(error = %err, "timer task join failed");
            }
        }
        info!("engine stopped");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("graph", &self.core.graph)
            .field("timers", &self.handles.len())
            .finish()
    }
}
