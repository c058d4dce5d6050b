//! End-to-end engine behavior: fetch, derived values, conditions, actions,
//! failure isolation, and idempotent re-evaluation.

use serde_json::json;

use crate::fixtures::{engine_with, settle, CountingAction, MockExchange};
use vigil::{Error, Result};

const ARBITRAGE: &str = r#"
[[tasks]]
name = "binance_btc"
exchange = "binance"
function = "fetch_ticker"
args = ["BTC/USDT"]
interval = 2
return = "binance_btc['last']"

[[tasks]]
name = "okx_btc"
exchange = "okx"
function = "fetch_ticker"
args = ["BTC/USDT"]
interval = 2
return = "okx_btc['last']"

[[tasks]]
name = "spread"
dependencies = ["binance_btc", "okx_btc"]
return = "binance_btc - okx_btc"
condition = "abs(binance_btc - okx_btc) > 100"
log = "arbitrage spread {spread:.2} USDT"
action = "notify"
"#;

fn arbitrage_fixture(okx_last: f64) -> (vigil::Engine, std::sync::Arc<CountingAction>) {
    let binance = MockExchange::new("binance");
    binance.respond("fetch_ticker", json!({"last": 50100.0}));
    let okx = MockExchange::new("okx");
    okx.respond("fetch_ticker", json!({"last": okx_last}));

    let engine = engine_with(ARBITRAGE, &[binance, okx]);
    let action = CountingAction::new();
    engine.register_action("notify", action.clone());
    (engine, action)
}

#[tokio::test]
async fn test_fetch_derive_condition_action() -> Result<()> {
    let (engine, action) = arbitrage_fixture(49950.0);

    engine.trigger("binance_btc").await?;
    engine.trigger("okx_btc").await?;
    settle().await;

    let now = chrono::Utc::now();
    let ttl = std::time::Duration::from_secs(60);
    assert_eq!(engine.cache().get("binance_btc", now, ttl), Some(json!(50100.0)));
    assert_eq!(engine.cache().get("okx_btc", now, ttl), Some(json!(49950.0)));
    // The cascade computed the derived value and fired the action.
    assert_eq!(engine.cache().get("spread", now, ttl), Some(json!(150)));
    assert_eq!(action.runs(), 1);

    let ctx = action.last_context().expect("action saw a context");
    assert_eq!(ctx.task, "spread");
    assert_eq!(ctx.values.get("spread"), Some(&json!(150)));
    assert_eq!(ctx.values.get("binance_btc"), Some(&json!(50100.0)));
    Ok(())
}

#[tokio::test]
async fn test_condition_below_threshold_does_not_fire() -> Result<()> {
    let (engine, action) = arbitrage_fixture(50050.0);

    engine.trigger("binance_btc").await?;
    engine.trigger("okx_btc").await?;
    settle().await;

    let now = chrono::Utc::now();
    let ttl = std::time::Duration::from_secs(60);
    // The derived value is still cached; only the action is withheld.
    assert_eq!(engine.cache().get("spread", now, ttl), Some(json!(50)));
    assert_eq!(action.runs(), 0);
    Ok(())
}

#[tokio::test]
async fn test_dependent_with_missing_dependency_skips() -> Result<()> {
    let (engine, action) = arbitrage_fixture(49950.0);

    // Only binance has been fetched; spread's return expression cannot bind
    // okx_btc, so the cascade skips it without error.
    engine.trigger("binance_btc").await?;
    settle().await;

    let now = chrono::Utc::now();
    let ttl = std::time::Duration::from_secs(60);
    assert_eq!(engine.cache().get("spread", now, ttl), None);
    assert_eq!(action.runs(), 0);
    Ok(())
}

#[tokio::test]
async fn test_fetch_failure_keeps_cache_and_skips_cascade() -> Result<()> {
    let binance = MockExchange::new("binance");
    binance.respond("fetch_ticker", json!({"last": 50100.0}));
    let okx = MockExchange::new("okx");
    okx.respond("fetch_ticker", json!({"last": 49950.0}));
    okx.fail("fetch_ticker", "connection reset");

    let engine = engine_with(ARBITRAGE, &[binance, okx]);
    let action = CountingAction::new();
    engine.register_action("notify", action.clone());

    engine.trigger("binance_btc").await?;
    engine.trigger("okx_btc").await?;
    settle().await;
    assert_eq!(action.runs(), 1);

    // Second okx tick fails: previous value survives, no new cascade.
    engine.trigger("okx_btc").await?;
    settle().await;

    let now = chrono::Utc::now();
    let ttl = std::time::Duration::from_secs(60);
    assert_eq!(engine.cache().get("okx_btc", now, ttl), Some(json!(49950.0)));
    assert_eq!(engine.cache().get("spread", now, ttl), Some(json!(150)));
    assert_eq!(action.runs(), 1);
    Ok(())
}

#[tokio::test]
async fn test_retick_with_identical_inputs_is_idempotent() -> Result<()> {
    let (engine, action) = arbitrage_fixture(49950.0);

    engine.trigger("binance_btc").await?;
    engine.trigger("okx_btc").await?;
    settle().await;
    let now = chrono::Utc::now();
    let ttl = std::time::Duration::from_secs(60);
    let first = engine.cache().get("spread", now, ttl);

    engine.trigger("okx_btc").await?;
    settle().await;

    // Same inputs, same derived value, and the condition fired again: the
    // evaluation itself has no side effects beyond the explicit cache write.
    assert_eq!(engine.cache().get("spread", chrono::Utc::now(), ttl), first);
    assert_eq!(action.runs(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unknown_exchange_is_rejected_at_build() {
    let config: vigil::AppConfig = toml::from_str(
        r#"
[[tasks]]
name = "btc"
exchange = "ghost"
function = "fetch_ticker"
interval = 2
"#,
    )
    .unwrap();
    let err = vigil::Engine::with_exchanges(
        &config,
        vigil::exchange::ExchangeRegistry::new(),
        std::time::Duration::from_secs(60),
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnknownExchange { .. }));
}

#[tokio::test]
async fn test_cycle_is_rejected_at_build() {
    let config: vigil::AppConfig = toml::from_str(
        r#"
[[tasks]]
name = "a"
interval = 2
dependencies = ["b"]

[[tasks]]
name = "b"
dependencies = ["a"]
"#,
    )
    .unwrap();
    let err = vigil::Engine::with_exchanges(
        &config,
        vigil::exchange::ExchangeRegistry::new(),
        std::time::Duration::from_secs(60),
    )
    .unwrap_err();
    match err {
        Error::Cycle { members } => assert_eq!(members, vec!["a".to_string(), "b".to_string()]),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_expression_is_rejected_at_build() {
    let config: vigil::AppConfig = toml::from_str(
        r#"
[[tasks]]
name = "bad"
interval = 2
condition = "abs(bad"
"#,
    )
    .unwrap();
    let err = vigil::Engine::with_exchanges(
        &config,
        vigil::exchange::ExchangeRegistry::new(),
        std::time::Duration::from_secs(60),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Syntax { field: "condition", .. }));
}

#[tokio::test]
async fn test_trigger_unknown_task() {
    let engine = engine_with(
        r#"
[[tasks]]
name = "heartbeat"
interval = 5
"#,
        &[],
    );
    let err = engine.trigger("ghost").await.unwrap_err();
    assert!(matches!(err, Error::TaskNotFound(name) if name == "ghost"));
}
