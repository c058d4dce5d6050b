//! Scheduler behavior: timer independence, cascade scope, shutdown.
//!
//! These tests run under tokio's paused clock (`start_paused`), so virtual
//! time advances deterministically and a "slow" exchange costs no real
//! wall-clock time.

use serde_json::json;
use std::time::Duration;

use crate::fixtures::{engine_with, MockExchange};
use vigil::Result;

#[tokio::test(start_paused = true)]
async fn test_slow_task_does_not_delay_fast_task() -> Result<()> {
    let fast = MockExchange::new("fast");
    fast.respond("fetch_ticker", json!({"last": 1.0}));
    let slow = MockExchange::new("slow");
    slow.respond("fetch_ticker", json!({"last": 2.0}));
    slow.set_delay(Duration::from_secs(30));

    let mut engine = engine_with(
        r#"
[[tasks]]
name = "fast_price"
exchange = "fast"
function = "fetch_ticker"
interval = 2

[[tasks]]
name = "slow_price"
exchange = "slow"
function = "fetch_ticker"
interval = 5
"#,
        &[fast.clone(), slow.clone()],
    );

    engine.start();
    tokio::time::sleep(Duration::from_secs(11)).await;

    // The slow task's 30s exchange call is still in flight from its first
    // tick; the fast task kept its 2s cadence regardless (ticks at 0, 2,
    // 4, 6, 8, 10).
    assert_eq!(slow.calls(), 1);
    assert!(
        fast.calls() >= 5,
        "fast task fell behind: {} calls in 11s",
        fast.calls()
    );

    engine.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_fires_immediately() -> Result<()> {
    let venue = MockExchange::new("venue");
    venue.respond("fetch_ticker", json!(42));

    let mut engine = engine_with(
        r#"
[[tasks]]
name = "price"
exchange = "venue"
function = "fetch_ticker"
interval = 3600
"#,
        &[venue.clone()],
    );

    engine.start();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // No need to wait a full hour for the first sample.
    assert_eq!(venue.calls(), 1);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_scheduling() -> Result<()> {
    let venue = MockExchange::new("venue");
    venue.respond("fetch_ticker", json!(42));

    let mut engine = engine_with(
        r#"
[[tasks]]
name = "price"
exchange = "venue"
function = "fetch_ticker"
interval = 2
"#,
        &[venue.clone()],
    );

    engine.start();
    tokio::time::sleep(Duration::from_secs(5)).await;
    engine.shutdown().await;

    let calls_at_shutdown = venue.calls();
    assert!(calls_at_shutdown >= 2);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(venue.calls(), calls_at_shutdown);
    Ok(())
}

#[tokio::test]
async fn test_cascade_excludes_interval_bearing_dependents() -> Result<()> {
    let venue = MockExchange::new("venue");
    venue.respond("fetch_ticker", json!({"last": 100.0}));

    let engine = engine_with(
        r#"
[[tasks]]
name = "price"
exchange = "venue"
function = "fetch_ticker"
interval = 2
return = "price['last']"

[[tasks]]
name = "derived"
dependencies = ["price"]
return = "price * 2"

[[tasks]]
name = "sampled"
dependencies = ["price"]
interval = 600
return = "price * 10"
"#,
        &[venue.clone()],
    );

    // Timers never start; only a manual root tick runs.
    engine.trigger("price").await?;

    let now = chrono::Utc::now();
    let ttl = Duration::from_secs(60);
    // The passive dependent was cascaded into...
    assert_eq!(engine.cache().get("derived", now, ttl), Some(json!(200)));
    // ...but the interval-bearing one is driven solely by its own timer.
    assert_eq!(engine.cache().get("sampled", now, ttl), None);
    Ok(())
}

#[tokio::test]
async fn test_cascade_runs_in_topological_order() -> Result<()> {
    let venue = MockExchange::new("venue");
    venue.respond("fetch_ticker", json!(10));

    let engine = engine_with(
        r#"
[[tasks]]
name = "root"
exchange = "venue"
function = "fetch_ticker"
interval = 2

[[tasks]]
name = "level_one"
dependencies = ["root"]
return = "root + 1"

[[tasks]]
name = "level_two"
dependencies = ["level_one"]
return = "level_one + 1"
"#,
        &[venue.clone()],
    );

    // A single root tick settles the whole chain because level_one is
    // evaluated before level_two within the same cascade.
    engine.trigger("root").await?;

    let now = chrono::Utc::now();
    let ttl = Duration::from_secs(60);
    assert_eq!(engine.cache().get("level_one", now, ttl), Some(json!(11)));
    assert_eq!(engine.cache().get("level_two", now, ttl), Some(json!(12)));
    Ok(())
}
