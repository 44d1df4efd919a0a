//! Core types and data structures for the price tracker.

use crate::error::{Result, TrackerError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source tag used for prices entered by hand.
pub const MANUAL_ENTRY_SOURCE: &str = "admin_manual_entry";

/// Compound identity of a commodity variant.
///
/// Absent parts are empty strings, never missing, so comparisons stay total.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommodityKey {
    /// Commodity name (e.g. "Rice")
    pub commodity_name: String,
    /// Variant type (e.g. "Premium"), empty when not applicable
    pub commodity_type: String,
    /// Specification (e.g. "5%-broken"), empty when not applicable
    pub specification: String,
}

impl CommodityKey {
    pub fn new(
        commodity_name: impl Into<String>,
        commodity_type: impl Into<String>,
        specification: impl Into<String>,
    ) -> Self {
        Self {
            commodity_name: commodity_name.into(),
            commodity_type: commodity_type.into(),
            specification: specification.into(),
        }
    }

    /// Key with only a commodity name.
    pub fn named(commodity_name: impl Into<String>) -> Self {
        Self::new(commodity_name, "", "")
    }

    pub fn is_empty(&self) -> bool {
        self.commodity_name.trim().is_empty()
    }

    /// Unambiguous form of the key: all three parts, empty ones included,
    /// with `\` and `/` escaped inside each part.
    ///
    /// Unlike [`Display`](fmt::Display), distinct keys never share this form.
    pub fn canonical(&self) -> String {
        [
            self.commodity_name.as_str(),
            self.commodity_type.as_str(),
            self.specification.as_str(),
        ]
        .iter()
        .map(|part| part.replace('\\', "\\\\").replace('/', "\\/"))
        .collect::<Vec<_>>()
        .join("/")
    }

    /// Filesystem/id friendly form of the key, derived from [`Self::canonical`].
    pub fn slug(&self) -> String {
        self.canonical()
            .chars()
            .map(|c| if c.is_whitespace() || c == '/' { '_' } else { c })
            .collect()
    }
}

/// Non-empty parts joined with `/`, e.g. `Rice/Premium/5%-broken`.
impl fmt::Display for CommodityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = [
            self.commodity_name.as_str(),
            self.commodity_type.as_str(),
            self.specification.as_str(),
        ]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
        write!(f, "{}", parts.join("/"))
    }
}

/// A single price observation for a commodity variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Commodity identity
    pub key: CommodityKey,
    /// Price per unit, always positive once validated
    pub price: f64,
    /// Observation date (no time component)
    pub date: NaiveDate,
    /// Category label (e.g. "RICE", "FISH PRODUCTS")
    pub category: String,
    /// Unit of measure (e.g. "kg")
    pub unit: String,
    /// Where the observation came from
    pub source: String,
}

impl PriceRecord {
    pub fn new(key: CommodityKey, price: f64, date: NaiveDate) -> Self {
        Self {
            key,
            price,
            date,
            category: String::new(),
            unit: String::new(),
            source: MANUAL_ENTRY_SOURCE.to_string(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Reject records that must never be persisted.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(TrackerError::validation("commodity name must not be empty"));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(TrackerError::validation(format!(
                "price for {} must be positive, got {}",
                self.key, self.price
            )));
        }
        Ok(())
    }
}

/// Parse a `YYYY-MM-DD` date string.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| TrackerError::validation(format!("malformed date '{}': {}", value, e)))
}

/// The cache's materialized "latest" price for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPriceEntry {
    pub record: PriceRecord,
    /// Wall-clock time the entry was written
    pub last_updated: DateTime<Utc>,
    /// Back-reference to the remote document, or an offline placeholder
    pub source_record_id: String,
}

impl LatestPriceEntry {
    pub fn key(&self) -> &CommodityKey {
        &self.record.key
    }
}

/// Why an upsert was or was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertReason {
    /// First record seen for the identity
    Created,
    /// Strictly newer than the cached entry
    Newer,
    /// Same date as the cached entry, treated as an amendment
    Amended,
    /// Older than the cached entry, cache left unchanged
    Superseded,
}

impl UpsertReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertReason::Created => "created",
            UpsertReason::Newer => "newer",
            UpsertReason::Amended => "amended",
            UpsertReason::Superseded => "superseded",
        }
    }
}

/// Result of a recency-gated upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResult {
    pub applied: bool,
    pub reason: UpsertReason,
}

impl UpsertResult {
    pub fn applied(reason: UpsertReason) -> Self {
        Self { applied: true, reason }
    }

    pub fn superseded() -> Self {
        Self {
            applied: false,
            reason: UpsertReason::Superseded,
        }
    }
}

/// Direction label of a forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
        }
    }
}

/// Forecast for one commodity variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub key: CommodityKey,
    pub category: String,
    pub current_price: f64,
    /// Next-week point estimate
    pub predicted_price: f64,
    pub next_week_forecast: f64,
    pub next_month_forecast: f64,
    /// Heuristic confidence, always within [60, 95]
    pub confidence: u8,
    pub trend: Trend,
    /// Explanatory labels, not used in any computation
    pub factors: Vec<String>,
    pub last_updated: DateTime<Utc>,
    pub record_id: String,
}

/// Per-cache sync bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Time of the last successful write
    pub last_sync: Option<DateTime<Utc>>,
}
