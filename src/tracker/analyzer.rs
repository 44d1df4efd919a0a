//! Volatility and trend analysis over a date-ordered price series.
//!
//! Volatility here is the population standard deviation of the relative
//! period-over-period changes, not of the prices themselves.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One `(price, date)` point of a historical series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub price: f64,
    pub date: NaiveDate,
}

/// Result of analyzing a series.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendAnalysis {
    /// Number of samples analyzed
    pub sample_count: usize,
    /// Mean relative change; `None` with fewer than two samples
    pub average_change: Option<f64>,
    /// Population std-dev of the relative changes; 0 with fewer than two samples
    pub volatility: f64,
}

impl TrendAnalysis {
    /// `|average_change|`, or 0 when the trend is undefined.
    pub fn trend_strength(&self) -> f64 {
        self.average_change.map(f64::abs).unwrap_or(0.0)
    }

    /// True when there is not enough data for a trend.
    pub fn is_degenerate(&self) -> bool {
        self.average_change.is_none()
    }
}

/// Relative changes `(p[i] - p[i-1]) / p[i-1]`.
///
/// Prices must be positive; callers validate before getting here.
pub fn relative_changes(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation; 0 for an empty slice.
pub fn population_std_dev(values: &[f64]) -> f64 {
    let Some(avg) = mean(values) else {
        return 0.0;
    };
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Analyze a date-ordered series of samples.
pub fn analyze(samples: &[PriceSample]) -> TrendAnalysis {
    let prices: Vec<f64> = samples.iter().map(|s| s.price).collect();
    let changes = relative_changes(&prices);

    TrendAnalysis {
        sample_count: samples.len(),
        average_change: mean(&changes),
        volatility: population_std_dev(&changes),
    }
}
