//! Forecast generator - turns a price history into next-week/next-month estimates.
//!
//! Two paths:
//! - rich (two or more samples): trend band multiplier, identity jitter,
//!   volatility multiplier, rubric confidence;
//! - degenerate (one sample): flat forecast at the current price with a fixed
//!   confidence of 65.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::{Result, TrackerError};
use crate::tracker::analyzer::{analyze, PriceSample, TrendAnalysis};
use crate::tracker::clock::Clock;
use crate::tracker::scorer::{score_confidence, DEGENERATE_CONFIDENCE};
use crate::types::{CommodityKey, ForecastEntry, PriceRecord, Trend};

/// Average change above which the label is `up` (below the negative, `down`).
const TREND_LABEL_THRESHOLD: f64 = 0.015;
/// Extra drift applied on top of the compounded monthly trend.
const MONTHLY_DRIFT: f64 = 1.02;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash of the key's canonical form.
pub fn identity_hash(key: &CommodityKey) -> u32 {
    fnv1a(key.canonical().as_bytes())
}

fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ byte as u32).wrapping_mul(FNV_PRIME)
    })
}

/// Map an average change onto the weekly trend multiplier.
///
/// The bands are symmetric around zero.
pub fn trend_multiplier(average_change: f64) -> f64 {
    match average_change {
        c if c > 0.05 => 1.05,
        c if c > 0.02 => 1.02,
        c if c > 0.01 => 1.01,
        c if c < -0.05 => 0.95,
        c if c < -0.02 => 0.98,
        c if c < -0.01 => 0.99,
        _ => 1.0,
    }
}

pub fn trend_label(average_change: f64) -> Trend {
    if average_change > TREND_LABEL_THRESHOLD {
        Trend::Up
    } else if average_change < -TREND_LABEL_THRESHOLD {
        Trend::Down
    } else {
        Trend::Stable
    }
}

/// Identity-derived multipliers.
///
/// This is cosmetic flavor so that flat series do not all collapse to the same
/// forecast. It is not a modeled seasonal or market signal, and it depends
/// only on the identity string so reruns are reproducible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityJitter {
    pub seasonal: f64,
    pub market: f64,
}

impl IdentityJitter {
    pub fn for_key(key: &CommodityKey) -> Self {
        let hash = identity_hash(key) as f64;
        Self {
            seasonal: 1.0 + (hash * 0.1).sin() * 0.05,
            market: 1.0 + (hash * 0.2).cos() * 0.03,
        }
    }
}

/// Explanatory labels for a rich forecast. Never feeds the numbers.
pub fn factor_labels(analysis: &TrendAnalysis, key: &CommodityKey) -> Vec<String> {
    let mut factors = Vec::new();
    let avg = analysis.average_change.unwrap_or(0.0);

    factors.push(
        match avg {
            c if c > 0.02 => "Strong upward trend",
            c if c > 0.01 => "Moderate upward trend",
            c if c < -0.02 => "Strong downward trend",
            c if c < -0.01 => "Moderate downward trend",
            _ => "Stable price trend",
        }
        .to_string(),
    );

    factors.push(
        if analysis.volatility > 0.2 {
            "High price volatility"
        } else if analysis.volatility < 0.1 {
            "Low price volatility"
        } else {
            "Moderate price volatility"
        }
        .to_string(),
    );

    factors.push(
        match analysis.sample_count {
            n if n >= 10 => "Extensive historical data",
            n if n >= 5 => "Good historical data",
            _ => "Limited historical data",
        }
        .to_string(),
    );

    let hash = identity_hash(key);
    if hash % 3 == 0 {
        factors.push("Seasonal demand patterns".to_string());
    }
    if hash % 5 == 0 {
        factors.push("Market supply fluctuations".to_string());
    }
    if hash % 7 == 0 {
        factors.push("Weather impact factors".to_string());
    }

    factors
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Validate a series and turn it into samples.
///
/// Every record must share one identity, carry a positive price, and have a
/// strictly increasing date.
pub fn validate_series(series: &[PriceRecord]) -> Result<Vec<PriceSample>> {
    let first = series
        .first()
        .ok_or_else(|| TrackerError::validation("cannot forecast an empty series"))?;

    if first.key.is_empty() {
        return Err(TrackerError::validation("commodity name must not be empty"));
    }

    let mut samples = Vec::with_capacity(series.len());
    for record in series {
        if record.key != first.key {
            return Err(TrackerError::validation(format!(
                "series mixes identities {} and {}",
                first.key, record.key
            )));
        }
        record.validate()?;
        if let Some(prev) = samples.last().map(|s: &PriceSample| s.date) {
            if record.date <= prev {
                return Err(TrackerError::validation(format!(
                    "series for {} has non-increasing dates ({} after {})",
                    record.key, record.date, prev
                )));
            }
        }
        samples.push(PriceSample {
            price: record.price,
            date: record.date,
        });
    }

    Ok(samples)
}

/// Generates forecasts from date-ordered price histories.
#[derive(Clone)]
pub struct ForecastGenerator {
    clock: Arc<dyn Clock>,
}

impl ForecastGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Forecast from a date-ordered series for one identity.
    #[instrument(skip(self, series), fields(samples = series.len()))]
    pub fn generate(&self, series: &[PriceRecord]) -> Result<ForecastEntry> {
        let samples = validate_series(series)?;
        // validate_series rejects empty input
        let latest = &series[series.len() - 1];
        let analysis = analyze(&samples);

        let forecast = match analysis.average_change {
            Some(avg) => self.rich_forecast(latest, &analysis, avg),
            None => self.basic_forecast(latest),
        };

        debug!(
            "Forecast for {}: {:.2} -> week {:.2}, month {:.2}, confidence {}, trend {}",
            forecast.key,
            forecast.current_price,
            forecast.next_week_forecast,
            forecast.next_month_forecast,
            forecast.confidence,
            forecast.trend.as_str()
        );

        Ok(forecast)
    }

    fn rich_forecast(&self, latest: &PriceRecord, analysis: &TrendAnalysis, avg: f64) -> ForecastEntry {
        let current = latest.price;
        let trend = trend_multiplier(avg);
        let jitter = IdentityJitter::for_key(&latest.key);
        let volatility_mult = 1.0 + analysis.volatility * 0.15;
        let common = jitter.seasonal * jitter.market * volatility_mult;

        let next_week = round_cents(current * trend * common);
        let next_month = round_cents(current * trend.powi(4) * common * MONTHLY_DRIFT);

        ForecastEntry {
            key: latest.key.clone(),
            category: latest.category.clone(),
            current_price: current,
            predicted_price: next_week,
            next_week_forecast: next_week,
            next_month_forecast: next_month,
            confidence: score_confidence(
                analysis.sample_count,
                analysis.volatility,
                analysis.trend_strength(),
            ),
            trend: trend_label(avg),
            factors: factor_labels(analysis, &latest.key),
            last_updated: self.clock.now(),
            record_id: format!("trend_{}", latest.key.slug()),
        }
    }

    fn basic_forecast(&self, latest: &PriceRecord) -> ForecastEntry {
        ForecastEntry {
            key: latest.key.clone(),
            category: latest.category.clone(),
            current_price: latest.price,
            predicted_price: latest.price,
            next_week_forecast: latest.price,
            next_month_forecast: latest.price,
            confidence: DEGENERATE_CONFIDENCE,
            trend: Trend::Stable,
            factors: vec![
                "Limited historical data".to_string(),
                "Basic price stability assumption".to_string(),
            ],
            last_updated: self.clock.now(),
            record_id: format!("basic_{}", latest.key.slug()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::clock::ManualClock;
    use crate::tracker::scorer::{MAX_CONFIDENCE, MIN_CONFIDENCE};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn generator() -> ForecastGenerator {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 20, 9, 0, 0).unwrap());
        ForecastGenerator::new(Arc::new(clock))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn weekly(key: &CommodityKey, prices: &[f64]) -> Vec<PriceRecord> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                PriceRecord::new(key.clone(), p, date(2024, 1, 1) + chrono::Duration::weeks(i as i64))
                    .with_category("RICE")
            })
            .collect()
    }

    #[test]
    fn test_identity_hash_is_fnv1a() {
        // Reference value of 32-bit FNV-1a.
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
        assert_eq!(identity_hash(&CommodityKey::named("a")), fnv1a(b"a//"));
        assert_eq!(
            identity_hash(&CommodityKey::new("Rice", "Premium", "5%-broken")),
            2_303_229_941
        );
    }

    #[test]
    fn test_identity_hash_separates_empty_parts() {
        let a = CommodityKey::new("A", "", "B");
        let b = CommodityKey::new("A", "B", "");
        assert_ne!(identity_hash(&a), identity_hash(&b));

        let gen = generator();
        let first = gen.generate(&[PriceRecord::new(a, 10.0, date(2024, 1, 1))]).unwrap();
        let second = gen.generate(&[PriceRecord::new(b, 10.0, date(2024, 1, 1))]).unwrap();
        assert_ne!(first.record_id, second.record_id);
    }

    #[test]
    fn test_trend_multiplier_is_symmetric() {
        for change in [0.005, 0.015, 0.03, 0.08] {
            let up = trend_multiplier(change) - 1.0;
            let down = 1.0 - trend_multiplier(-change);
            assert!((up - down).abs() < 1e-12, "asymmetric band at {}", change);
        }
        assert_eq!(trend_multiplier(0.0), 1.0);
        assert_eq!(trend_multiplier(0.01), 1.0);
    }

    #[test]
    fn test_trend_label_thresholds() {
        assert_eq!(trend_label(0.016), Trend::Up);
        assert_eq!(trend_label(0.015), Trend::Stable);
        assert_eq!(trend_label(-0.016), Trend::Down);
        assert_eq!(trend_label(0.0), Trend::Stable);
    }

    #[test]
    fn test_rice_rising_series() {
        let key = CommodityKey::new("Rice", "Premium", "5%-broken");
        let series = vec![
            PriceRecord::new(key.clone(), 45.00, date(2024, 1, 1)),
            PriceRecord::new(key.clone(), 46.35, date(2024, 1, 8)),
            PriceRecord::new(key.clone(), 47.00, date(2024, 1, 15)),
        ];

        let forecast = generator().generate(&series).unwrap();

        assert_eq!(forecast.current_price, 47.00);
        assert_eq!(forecast.trend, Trend::Up);
        assert!(forecast.next_week_forecast > 47.00);
        assert_eq!(forecast.predicted_price, forecast.next_week_forecast);
        assert!((70..=90).contains(&forecast.confidence));
        assert_eq!(forecast.factors[0], "Strong upward trend");
        assert_eq!(forecast.factors[1], "Low price volatility");
        assert_eq!(forecast.factors[2], "Limited historical data");
    }

    #[test]
    fn test_single_sample_forecast() {
        let key = CommodityKey::named("X");
        let series = vec![PriceRecord::new(key, 100.00, date(2024, 5, 1))];

        let forecast = generator().generate(&series).unwrap();

        assert_eq!(forecast.predicted_price, 100.00);
        assert_eq!(forecast.next_week_forecast, 100.00);
        assert_eq!(forecast.next_month_forecast, 100.00);
        assert_eq!(forecast.confidence, 65);
        assert_eq!(forecast.trend, Trend::Stable);
        assert_eq!(
            forecast.factors,
            vec!["Limited historical data", "Basic price stability assumption"]
        );
    }

    #[test]
    fn test_generation_is_deterministic() {
        let key = CommodityKey::new("Tilapia", "", "Medium");
        let series = weekly(&key, &[150.0, 148.5, 153.03, 151.0, 149.2, 155.8]);
        let gen = generator();

        let first = gen.generate(&series).unwrap();
        let second = gen.generate(&series).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_factors_do_not_change_prices() {
        // Same series under two identities: only the jitter may differ.
        let a = CommodityKey::named("Ampalaya");
        let b = CommodityKey::named("Sitaw");
        let gen = generator();

        let fa = gen.generate(&weekly(&a, &[80.0, 80.0, 80.0])).unwrap();
        let fb = gen.generate(&weekly(&b, &[80.0, 80.0, 80.0])).unwrap();

        let ja = IdentityJitter::for_key(&a);
        let jb = IdentityJitter::for_key(&b);
        assert!((fa.next_week_forecast - round_cents(80.0 * ja.seasonal * ja.market)).abs() < 1e-9);
        assert!((fb.next_week_forecast - round_cents(80.0 * jb.seasonal * jb.market)).abs() < 1e-9);
        assert_eq!(fa.trend, Trend::Stable);
        assert_eq!(fa.confidence, fb.confidence);
    }

    #[test]
    fn test_month_compounds_weekly_trend() {
        let key = CommodityKey::named("Onion");
        // +10% per step: strongest band.
        let series = weekly(&key, &[100.0, 110.0, 121.0]);
        let forecast = generator().generate(&series).unwrap();

        let jitter = IdentityJitter::for_key(&key);
        let common = jitter.seasonal * jitter.market; // zero volatility
        assert!((forecast.next_week_forecast - round_cents(121.0 * 1.05 * common)).abs() < 1e-9);
        assert!(
            (forecast.next_month_forecast - round_cents(121.0 * 1.05f64.powi(4) * common * 1.02)).abs()
                < 1e-9
        );
    }

    #[test]
    fn test_confidence_bounds_across_series() {
        let gen = generator();
        let shapes: Vec<Vec<f64>> = vec![
            vec![10.0],
            vec![10.0, 30.0],
            vec![10.0, 5.0, 20.0, 2.0],
            vec![100.0; 12],
            (1..=15).map(|i| 100.0 + i as f64).collect(),
            (1..=15).map(|i| if i % 2 == 0 { 50.0 } else { 150.0 }).collect(),
        ];

        for (i, prices) in shapes.iter().enumerate() {
            let key = CommodityKey::named(format!("Commodity {}", i));
            let forecast = gen.generate(&weekly(&key, prices)).unwrap();
            assert!(
                (MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&forecast.confidence),
                "confidence {} out of bounds",
                forecast.confidence
            );
            assert!(forecast.next_week_forecast > 0.0);
        }
    }

    #[test]
    fn test_rejects_invalid_series() {
        let gen = generator();
        let key = CommodityKey::named("Garlic");

        assert!(gen.generate(&[]).unwrap_err().is_validation());

        let zero = vec![PriceRecord::new(key.clone(), 0.0, date(2024, 1, 1))];
        assert!(gen.generate(&zero).unwrap_err().is_validation());

        let duplicate = vec![
            PriceRecord::new(key.clone(), 10.0, date(2024, 1, 1)),
            PriceRecord::new(key.clone(), 11.0, date(2024, 1, 1)),
        ];
        assert!(gen.generate(&duplicate).is_err());

        let backwards = vec![
            PriceRecord::new(key.clone(), 10.0, date(2024, 1, 8)),
            PriceRecord::new(key.clone(), 11.0, date(2024, 1, 1)),
        ];
        assert!(gen.generate(&backwards).is_err());

        let unnamed = vec![PriceRecord::new(CommodityKey::named(""), 10.0, date(2024, 1, 1))];
        assert!(gen.generate(&unnamed).is_err());

        let mixed = vec![
            PriceRecord::new(key, 10.0, date(2024, 1, 1)),
            PriceRecord::new(CommodityKey::named("Ginger"), 11.0, date(2024, 1, 8)),
        ];
        assert!(gen.generate(&mixed).is_err());
    }

    #[test]
    fn test_flavor_factors_follow_hash() {
        let key = CommodityKey::new("Rice", "Premium", "5%-broken");
        let analysis = analyze(&[
            PriceSample { price: 1.0, date: date(2024, 1, 1) },
            PriceSample { price: 1.0, date: date(2024, 1, 2) },
        ]);
        let factors = factor_labels(&analysis, &key);
        let hash = identity_hash(&key);

        assert_eq!(factors.contains(&"Seasonal demand patterns".to_string()), hash % 3 == 0);
        assert_eq!(factors.contains(&"Market supply fluctuations".to_string()), hash % 5 == 0);
        assert_eq!(factors.contains(&"Weather impact factors".to_string()), hash % 7 == 0);
    }
}
