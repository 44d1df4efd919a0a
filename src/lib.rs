//! Agricultural commodity price tracker core.
//!
//! Offline-first "latest price per commodity" cache with recency-gated
//! upserts, a price history, and a deterministic heuristic forecaster that
//! degrades to a single-sample fallback.

pub mod error;
pub mod tracker;
pub mod types;

// Re-export main types for convenience
pub use error::{Result, TrackerError};
pub use tracker::{ReconciliationCoordinator, TrackerBuilder, TrackerConfig};
pub use types::{CommodityKey, ForecastEntry, LatestPriceEntry, PriceRecord, Trend, UpsertReason, UpsertResult};
