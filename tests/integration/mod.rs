//! Integration test suite for vigil.
//!
//! These tests exercise the engine end-to-end: fetch, derived values,
//! conditions, actions, cascades, and timer independence. Exchanges are
//! scripted mocks, so the suite makes no network calls and is safe in CI;
//! timer tests run under tokio's paused clock for determinism.

mod fixtures;

mod engine_e2e;
mod scheduling;
