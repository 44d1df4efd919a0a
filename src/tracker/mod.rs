//! Tracker module - offline-first price caches and heuristic forecasting.
//!
//! The leaf components (analyzer, scorer, forecaster) are pure. The caches
//! own their state and persist it through a [`KeyValueStore`]. The
//! [`ReconciliationCoordinator`] is the only component that talks to the
//! remote, always through a [`RemoteGateway`].

pub mod analyzer;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod forecast_cache;
pub mod forecaster;
pub mod history;
pub mod price_cache;
pub mod remote;
pub mod scorer;
pub mod storage;

use std::sync::Arc;
use tracing::warn;

pub use analyzer::{analyze, PriceSample, TrendAnalysis};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrackerConfig;
pub use coordinator::{
    ImportSummary, OutcomeKind, ReconciliationCoordinator, ReconciliationOutcome,
    RefreshSummary, RegenerationSummary,
};
pub use forecast_cache::LocalForecastCache;
pub use forecaster::ForecastGenerator;
pub use history::PriceHistory;
pub use price_cache::LocalPriceCache;
pub use remote::{InMemoryRemote, PushOutcome, RemoteGateway, RemotePriceStore, RemoteRecord};
pub use scorer::score_confidence;
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};

/// Tracker builder for convenient construction with sensible defaults.
pub struct TrackerBuilder {
    config: TrackerConfig,
    remote: Option<Arc<dyn RemotePriceStore>>,
    clock: Arc<dyn Clock>,
}

impl TrackerBuilder {
    pub fn new() -> Self {
        Self {
            config: TrackerConfig::default(),
            remote: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Start from an existing configuration.
    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the remote timeout in milliseconds.
    pub fn with_remote_timeout(mut self, timeout_ms: u64) -> Self {
        self.config.remote_timeout_ms = timeout_ms;
        self
    }

    /// Set remote retry attempts and the first backoff delay.
    pub fn with_retries(mut self, attempts: usize, base_delay_ms: u64) -> Self {
        self.config.remote_retry_attempts = attempts;
        self.config.remote_retry_base_ms = base_delay_ms;
        self
    }

    /// Set circuit breaker configuration.
    pub fn with_circuit_breaker(mut self, failure_threshold: u32, cooldown_seconds: u64) -> Self {
        self.config.circuit_breaker_failure_threshold = failure_threshold;
        self.config.circuit_breaker_cooldown_seconds = cooldown_seconds;
        self
    }

    /// Set forecast staleness TTL in seconds.
    pub fn with_forecast_ttl(mut self, ttl_seconds: u64) -> Self {
        self.config.forecast_ttl_seconds = ttl_seconds;
        self
    }

    /// Set latest-price refresh TTL in seconds.
    pub fn with_price_refresh_ttl(mut self, ttl_seconds: u64) -> Self {
        self.config.price_refresh_ttl_seconds = ttl_seconds;
        self
    }

    /// Attach a remote store. Without one the tracker runs purely offline.
    pub fn with_remote(mut self, remote: Arc<dyn RemotePriceStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the tracker configuration.
    pub fn build_config(self) -> TrackerConfig {
        self.config
    }

    /// Open the caches on `store` and wire up the coordinator.
    pub async fn open(self, store: Arc<dyn KeyValueStore>) -> crate::error::Result<ReconciliationCoordinator> {
        if !store.health_check().await? {
            warn!("Local store health check failed; caches may not persist");
        }

        let prices = LocalPriceCache::open(store.clone(), self.clock.clone()).await;
        let history = PriceHistory::open(store.clone(), self.clock.clone()).await;
        let forecasts = LocalForecastCache::open(store, self.clock.clone()).await;
        let gateway = self
            .remote
            .map(|remote| RemoteGateway::new(remote, self.config.clone()));

        Ok(ReconciliationCoordinator::new(
            self.config,
            prices,
            history,
            forecasts,
            gateway,
            self.clock,
        ))
    }
}

impl Default for TrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
