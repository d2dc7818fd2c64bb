//! Signal sources (consumed capability, §6).
//!
//! A signal source is any async capability of the shape `market -> []Signal`.
//! Concrete feeds (RSS, a news API, an on-chain oracle) are external
//! collaborators; this module defines only the trait the orchestrator polls
//! and a couple of deterministic reference sources used in tests and as a
//! stand-in while wiring a deployment.

use crate::models::{Market, Signal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[async_trait]
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &str;

    async fn signals_for(&self, market: &Market) -> anyhow::Result<Vec<Signal>>;

    /// TTL-based internal state eviction. Default is a no-op; sources that
    /// cache per-market fetch timestamps should override this (spec's Open
    /// Question: the orchestrator calls this on its cleanup sweep, but each
    /// source chooses its own TTL).
    fn cleanup(&self, _now: DateTime<Utc>) {}

    /// Per-source timeout the orchestrator awaits this source's poll within.
    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}

/// A source that never produces signals. Useful as a harmless default when
/// no real collaborators are wired yet.
pub struct NullSignalSource;

#[async_trait]
impl SignalSource for NullSignalSource {
    fn name(&self) -> &str {
        "null"
    }

    async fn signals_for(&self, _market: &Market) -> anyhow::Result<Vec<Signal>> {
        Ok(Vec::new())
    }
}
