//! Test fixtures: scripted exchanges, counting actions, engine builders.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vigil::action::{ActionContext, ActionError, ActionHandler};
use vigil::exchange::{ExchangeClient, ExchangeError, ExchangeRegistry};
use vigil::{AppConfig, Engine};

type CallResult = Result<Value, ExchangeError>;

/// A scripted exchange client.
///
/// Responses are queued per function; the last queued response is sticky,
/// so a single `respond` serves any number of ticks while a sequence like
/// `respond, fail` produces one success and then persistent failure.
/// An optional artificial latency simulates a slow venue.
pub struct MockExchange {
    name: String,
    responses: Mutex<HashMap<String, VecDeque<CallResult>>>,
    calls: AtomicUsize,
    delay: Mutex<Duration>,
}

impl MockExchange {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            responses: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn respond(&self, function: &str, value: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry(function.to_string())
            .or_default()
            .push_back(Ok(value));
    }

    pub fn fail(&self, function: &str, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .entry(function.to_string())
            .or_default()
            .push_back(Err(ExchangeError::Transport(message.to_string())));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        function: &str,
        _args: &[Value],
        _kwargs: &Map<String, Value>,
    ) -> Result<Value, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        let mut responses = self.responses.lock().unwrap();
        let queue = responses
            .get_mut(function)
            .ok_or_else(|| ExchangeError::Unsupported(function.to_string()))?;
        match queue.len() {
            0 => Err(ExchangeError::Unsupported(function.to_string())),
            1 => queue.front().cloned().unwrap(),
            _ => queue.pop_front().unwrap(),
        }
    }
}

/// Action handler that counts invocations and remembers the last context.
pub struct CountingAction {
    runs: AtomicUsize,
    last: Mutex<Option<ActionContext>>,
}

impl CountingAction {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn last_context(&self) -> Option<ActionContext> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionHandler for CountingAction {
    async fn run(&self, ctx: ActionContext) -> Result<(), ActionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(ctx);
        Ok(())
    }
}

/// Build an engine from a `[[tasks]]`-only TOML document and a set of mock
/// exchanges. The default TTL is 60 seconds, as in production.
pub fn engine_with(tasks_toml: &str, exchanges: &[Arc<MockExchange>]) -> Engine {
    let config: AppConfig = toml::from_str(tasks_toml).expect("test config parses");
    let mut registry = ExchangeRegistry::new();
    for exchange in exchanges {
        registry.insert(Arc::clone(exchange) as Arc<dyn ExchangeClient>);
    }
    Engine::with_exchanges(&config, registry, Duration::from_secs(60)).expect("test config valid")
}

/// Let detached action tasks settle.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
