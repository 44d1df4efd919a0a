//! Tracker configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the caches and the remote gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Overall deadline for one remote operation, retries included
    pub remote_timeout_ms: u64,
    /// Extra attempts after the first failed remote call
    pub remote_retry_attempts: usize,
    /// First backoff delay between remote retries
    pub remote_retry_base_ms: u64,
    /// Consecutive remote failures before the gateway degrades
    pub circuit_breaker_failure_threshold: u32,
    /// How long the gateway skips the remote once it starts cooling down
    pub circuit_breaker_cooldown_seconds: u64,
    /// Forecasts older than this are stale
    pub forecast_ttl_seconds: u64,
    /// Latest prices older than this should be refreshed from the remote
    pub price_refresh_ttl_seconds: u64,
    /// Connection pool size for the sqlite store
    pub sqlite_max_connections: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            remote_timeout_ms: 5_000,
            remote_retry_attempts: 2,
            remote_retry_base_ms: 100,
            circuit_breaker_failure_threshold: 3,
            circuit_breaker_cooldown_seconds: 60,
            forecast_ttl_seconds: 7 * 24 * 60 * 60,
            price_refresh_ttl_seconds: 60 * 60,
            sqlite_max_connections: 5,
        }
    }
}

impl TrackerConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse tracker config")
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_seconds)
    }

    pub fn forecast_ttl(&self) -> Duration {
        Duration::from_secs(self.forecast_ttl_seconds)
    }

    pub fn price_refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.price_refresh_ttl_seconds)
    }
}
