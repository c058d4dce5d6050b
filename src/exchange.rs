//! Exchange access layer.
//!
//! The engine only ever sees [`ExchangeClient`]: an opaque async RPC
//! surface keyed by binding name. Every failure kind is handled the same
//! way upstream (log, skip the tick, keep the previous cached value), so
//! the error enum exists for log lines, not for control flow.
//!
//! [`RestExchange`] is the default client: a generic JSON-over-HTTP gateway
//! that posts `{args, kwargs}` to `<base_url>/<function>` with the
//! binding's credentials as headers. Anything else (including the test
//! doubles the integration suite uses) plugs in through the registry.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ExchangeConfig;

#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("unsupported function '{0}'")]
    Unsupported(String),
}

impl ExchangeError {
    /// Short kind tag for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::Transport(_) => "transport",
            ExchangeError::Auth(_) => "auth",
            ExchangeError::RateLimit(_) => "rate_limit",
            ExchangeError::Unsupported(_) => "unsupported",
        }
    }
}

/// Asynchronous RPC client bound to one exchange.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// The binding name this client serves.
    fn name(&self) -> &str;

    /// Invoke a remote function. May suspend on network I/O; the engine
    /// never cancels an in-flight call.
    async fn call(
        &self,
        function: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value, ExchangeError>;
}

/// Name -> client map, read-only once the engine starts.
#[derive(Default)]
pub struct ExchangeRegistry {
    clients: HashMap<String, Arc<dyn ExchangeClient>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry of [`RestExchange`] clients from config bindings.
    pub fn from_configs(configs: &[ExchangeConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs {
            registry.insert(Arc::new(RestExchange::from_config(config)));
        }
        registry
    }

    pub fn insert(&mut self, client: Arc<dyn ExchangeClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExchangeClient>> {
        self.clients.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRegistry")
            .field("clients", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// JSON-over-HTTP gateway client.
pub struct RestExchange {
    name: String,
    base_url: String,
    api_key: Option<String>,
    secret: Option<String>,
    password: Option<String>,
    http: reqwest::Client,
}

impl RestExchange {
    pub fn from_config(config: &ExchangeConfig) -> Self {
        let base_url = config
            .option_str("base_url")
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        Self {
            name: config.name.clone(),
            base_url,
            api_key: config.api_key.clone(),
            secret: config.secret.clone(),
            password: config.password.clone(),
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, function: &str) -> String {
        format!("{}/{}", self.base_url, function)
    }
}

#[async_trait]
impl ExchangeClient for RestExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        function: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value, ExchangeError> {
        if self.base_url.is_empty() {
            return Err(ExchangeError::Transport(format!(
                "exchange '{}' has no base_url option",
                self.name
            )));
        }

        let mut request = self
            .http
            .post(self.endpoint(function))
            .json(&json!({ "args": args, "kwargs": kwargs }));
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }
        if let Some(secret) = &self.secret {
            request = request.header("X-Api-Secret", secret);
        }
        if let Some(password) = &self.password {
            request = request.header("X-Api-Passphrase", password);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<Value>()
                .await
                .map_err(|e| ExchangeError::Transport(e.to_string())),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => Err(
                ExchangeError::Auth(format!("{} returned {}", self.name, response.status())),
            ),
            reqwest::StatusCode::TOO_MANY_REQUESTS => Err(ExchangeError::RateLimit(format!(
                "{} returned 429",
                self.name
            ))),
            reqwest::StatusCode::NOT_FOUND => {
                Err(ExchangeError::Unsupported(function.to_string()))
            }
            status => Err(ExchangeError::Transport(format!(
                "{} returned {}",
                self.name, status
            ))),
        }
    }
}
