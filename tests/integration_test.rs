//! End-to-end tests for the price tracker through its public API

use agri_price_tracker::tracker::{
    ForecastGenerator, InMemoryRemote, LocalPriceCache, ManualClock, MemoryStore, OutcomeKind,
    TrackerBuilder,
};
use agri_price_tracker::types::{parse_date, CommodityKey, PriceRecord, Trend, UpsertReason};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 10, 18, 8, 0, 0).unwrap()))
}

fn record(key: &CommodityKey, price: f64, date: &str) -> PriceRecord {
    PriceRecord::new(key.clone(), price, parse_date(date).unwrap())
}

#[tokio::test]
async fn test_rice_series_forecasts_upward() {
    let rice = CommodityKey::new("Rice", "Premium", "5%-broken");
    let generator = ForecastGenerator::new(clock());

    let forecast = generator
        .generate(&[
            record(&rice, 45.00, "2024-01-01"),
            record(&rice, 46.35, "2024-01-08"),
            record(&rice, 47.00, "2024-01-15"),
        ])
        .unwrap();

    assert_eq!(forecast.trend, Trend::Up);
    assert_eq!(forecast.current_price, 47.00);
    assert!(forecast.next_week_forecast > 47.00);
    assert!((70..=90).contains(&forecast.confidence));
}

#[tokio::test]
async fn test_single_sample_fallback() {
    let x = CommodityKey::named("X");
    let generator = ForecastGenerator::new(clock());

    let forecast = generator.generate(&[record(&x, 100.00, "2024-05-01")]).unwrap();

    assert_eq!(forecast.predicted_price, 100.00);
    assert_eq!(forecast.confidence, 65);
    assert_eq!(
        forecast.factors,
        vec!["Limited historical data", "Basic price stability assumption"]
    );
}

#[tokio::test]
async fn test_late_tilapia_price_is_superseded() {
    let tilapia = CommodityKey::named("Tilapia");
    let cache = LocalPriceCache::open(MemoryStore::new(), clock()).await;

    cache.upsert(record(&tilapia, 153.03, "2025-10-18")).await.unwrap();
    let result = cache.upsert(record(&tilapia, 140.00, "2025-10-17")).await.unwrap();

    assert!(!result.applied);
    assert_eq!(result.reason, UpsertReason::Superseded);
    assert_eq!(cache.get_one(&tilapia).await.unwrap().record.price, 153.03);
}

#[tokio::test]
async fn test_unreachable_remote_keeps_local_path_working() {
    let remote = InMemoryRemote::new();
    remote.set_latency(Duration::from_millis(500));

    let tracker = TrackerBuilder::new()
        .with_remote_timeout(50)
        .with_retries(0, 1)
        .with_clock(clock())
        .with_remote(remote)
        .open(MemoryStore::new())
        .await
        .unwrap();

    assert!(tracker.prices().get_all().await.is_empty());
    let refresh = tracker.refresh_from_remote().await.unwrap();
    assert_eq!(refresh.applied, 0);
    assert_eq!(refresh.unavailable, 1);

    let tilapia = CommodityKey::named("Tilapia");
    let outcome = tracker
        .record_price(record(&tilapia, 153.03, "2025-10-18"))
        .await
        .unwrap();

    assert_eq!(outcome.kind, OutcomeKind::RemoteFailedButCachedLocally);
    assert!(outcome.upsert.applied);
    assert_eq!(tracker.prices().get_all().await.len(), 1);
}

#[tokio::test]
async fn test_cold_device_pulls_latest_prices() {
    let remote = InMemoryRemote::new();
    let tilapia = CommodityKey::named("Tilapia");
    let seeded = TrackerBuilder::new()
        .with_clock(clock())
        .with_remote(remote.clone())
        .open(MemoryStore::new())
        .await
        .unwrap();
    seeded.record_price(record(&tilapia, 153.03, "2025-10-18")).await.unwrap();

    let fresh = TrackerBuilder::new()
        .with_clock(clock())
        .with_remote(remote)
        .open(MemoryStore::new())
        .await
        .unwrap();
    let summary = fresh.refresh_from_remote().await.unwrap();

    assert_eq!(summary.applied, 1);
    let latest = fresh.prices().get_one(&tilapia).await.unwrap();
    assert_eq!(latest.record.price, 153.03);
    assert!(latest.source_record_id.starts_with("remote_"));
}

#[tokio::test]
async fn test_forecast_staleness_follows_clock() {
    let clock = clock();
    let tracker = TrackerBuilder::new()
        .with_clock(clock.clone())
        .with_price_refresh_ttl(1_800)
        .open(MemoryStore::new())
        .await
        .unwrap();

    assert!(tracker.forecasts_stale().await);
    assert!(tracker.prices_need_refresh().await);

    let tilapia = CommodityKey::named("Tilapia");
    tracker
        .record_price(record(&tilapia, 153.03, "2025-10-18"))
        .await
        .unwrap();
    tracker.regenerate_forecasts().await.unwrap();
    assert!(!tracker.forecasts_stale().await);
    assert!(!tracker.prices_need_refresh().await);

    clock.advance(chrono::Duration::minutes(29));
    assert!(!tracker.prices_need_refresh().await);
    clock.advance(chrono::Duration::minutes(2));
    assert!(tracker.prices_need_refresh().await);
    assert!(!tracker.forecasts_stale().await);

    clock.advance(chrono::Duration::days(8));
    assert!(tracker.forecasts_stale().await);
}

#[tokio::test]
async fn test_concurrent_writers_keep_newest() {
    let tracker = Arc::new(
        TrackerBuilder::new()
            .with_clock(clock())
            .open(MemoryStore::new())
            .await
            .unwrap(),
    );
    let bangus = CommodityKey::named("Bangus");

    let mut handles = Vec::new();
    for day in 1..=20u32 {
        let tracker = tracker.clone();
        let key = bangus.clone();
        handles.push(tokio::spawn(async move {
            let date = format!("2025-09-{:02}", day);
            tracker
                .record_price(record(&key, 100.0 + day as f64, &date))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let latest = tracker.prices().get_one(&bangus).await.unwrap();
    assert_eq!(latest.record.price, 120.0);
    assert_eq!(tracker.history().series(&bangus).await.len(), 20);

    let summary = tracker.regenerate_forecasts().await.unwrap();
    assert_eq!(summary.generated, 1);
    let forecast = tracker.forecast_for(&bangus).await.unwrap().unwrap();
    assert_eq!(forecast.current_price, 120.0);
    assert!((60..=95).contains(&forecast.confidence));
}
