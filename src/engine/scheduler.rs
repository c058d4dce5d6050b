//! Timer loops and the per-tick execution pipeline.
//!
//! Every interval-bearing task gets its own tokio task running a
//! `tokio::time::interval` loop, so a slow exchange call on one task never
//! delays another's tick. The first tick fires immediately on startup.
//!
//! A tick runs: build context -> fetch (if any) -> return expression ->
//! cache write -> condition -> log/action, then cascades through the
//! task's descendants in topological order, skipping any descendant that
//! has its own timer. Every failure inside a tick is task-scoped: it is
//! logged and ends that task's tick, nothing else.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::ExecutionContext;
use super::EngineCore;
use crate::action::ActionContext;
use crate::expr::EvalError;

/// Outcome of one task execution within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// The task wrote a fresh value to the cache.
    Updated,
    /// The tick was abandoned (fetch failure, stale dependency, eval
    /// error). The cache was not touched; the next trigger retries.
    Skipped,
}

/// Spawn one timer loop per interval-bearing task.
pub(crate) fn spawn_timers(
    core: &Arc<EngineCore>,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for task in core.graph.tasks() {
        let Some(period) = task.interval else {
            continue;
        };
        let name = task.name.clone();
        let core = Arc::clone(core);
        let cancel = cancel.clone();
        info!(task = %name, period_secs = period.as_secs(), "task scheduled");

        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // If a tick overruns its period, push the next one out instead
            // of firing a burst.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(task = %name, "timer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        run_tick(&core, &name).await;
                    }
                }
            }
        }));
    }
    handles
}

/// One full tick: execute the task, then cascade to its non-interval
/// descendants in topological order.
pub(crate) async fn run_tick(core: &EngineCore, name: &str) {
    if execute(core, name).await == TickOutcome::Skipped {
        return;
    }
    for descendant in core.graph.descendants_of(name) {
        let Some(task) = core.graph.task(&descendant) else {
            continue;
        };
        // Interval-bearing dependents are driven solely by their own timer.
        if task.has_interval() {
            continue;
        }
        // A skipped descendant does not stop its siblings; its own
        // downstream simply finds a stale value and skips too.
        execute(core, &descendant).await;
    }
}

/// The execution pipeline for a single task.
async fn execute(core: &EngineCore, name: &str) -> TickOutcome {
    let Some(task) = core.graph.task(name) else {
        warn!(task = name, "tick for unknown task");
        return TickOutcome::Skipped;
    };
    debug!(task = name, "executing");

    let mut ctx = ExecutionContext::for_task(&core.graph, &core.cache, task, Utc::now());

    let mut value = Value::Null;
    if let Some(fetch) = &task.fetch {
        let exchange = task.exchange.as_deref().unwrap_or_default();
        let Some(client) = core.exchanges.get(exchange) else {
            warn!(task = name, exchange, "exchange client missing");
            return TickOutcome::Skipped;
        };
        match client.call(&fetch.function, &fetch.args, &fetch.kwargs).await {
            Ok(result) => value = result,
            Err(err) => {
                // Previous cached value, if still valid, remains usable for
                // dependents. No retry before the next scheduled interval.
                warn!(
                    task = name,
                    exchange,
                    function = %fetch.function,
                    kind = err.kind(),
                    error = %err,
                    "fetch failed"
                );
                return TickOutcome::Skipped;
            }
        }
    }
    ctx.bind(name, value.clone());

    if let Some(expr) = &task.return_expr {
        match expr.eval(ctx.values()) {
            Ok(derived) => {
                value = derived;
                ctx.bind(name, value.clone());
            }
            Err(EvalError::Unbound(missing)) => {
                debug!(task = name, missing = %missing, "dependency not ready, skipping tick");
                return TickOutcome::Skipped;
            }
            Err(err) => {
                warn!(task = name, expression = %expr, error = %err, "return expression failed");
                return TickOutcome::Skipped;
            }
        }
    }

    core.cache.put(name, value, Utc::now());

    let fire = match &task.condition {
        None => true,
        Some(condition) => match condition.eval_condition(ctx.values()) {
            Ok(fire) => fire,
            Err(EvalError::Unbound(missing)) => {
                debug!(task = name, missing = %missing, "condition dependency not ready");
                false
            }
            Err(err) => {
                warn!(task = name, expression = %condition, error = %err, "condition failed");
                false
            }
        },
    };

    if fire {
        if let Some(template) = &task.log {
            match template.render(ctx.values()) {
                Ok(line) => info!(task = name, "{}", line),
                Err(err) => warn!(task = name, error = %err, "log template failed"),
            }
        }
        if let Some(reference) = &task.action {
            let action_ctx = ActionContext {
                task: name.to_string(),
                values: ctx.values().clone(),
                exchange: task
                    .exchange
                    .as_deref()
                    .and_then(|ex| core.exchanges.get(ex)),
            };
            // Fire-and-forget: the scheduler does not wait for the action.
            core.actions.dispatch(reference, action_ctx);
        }
    }

    TickOutcome::Updated
}
