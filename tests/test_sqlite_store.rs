//! Tests for the sqlite-backed key-value store and the caches on top of it

use agri_price_tracker::tracker::{
    KeyValueStore, LocalForecastCache, LocalPriceCache, PriceHistory, SqliteStore, SystemClock,
    TrackerBuilder,
};
use agri_price_tracker::types::{parse_date, CommodityKey, PriceRecord};
use std::sync::Arc;

#[tokio::test]
async fn test_sqlite_store_basic_operations() {
    let store = SqliteStore::in_memory()
        .await
        .expect("Failed to create in-memory store");

    assert!(store.health_check().await.unwrap());
    assert!(store.get("missing").await.unwrap().is_none());

    store.set("b", "2").await.unwrap();
    store.set("a", "1").await.unwrap();
    store.set("a", "one").await.unwrap();

    assert_eq!(store.get("a").await.unwrap().as_deref(), Some("one"));
    assert_eq!(store.list_keys().await.unwrap(), vec!["a", "b"]);

    store.remove("a").await.unwrap();
    store.remove("a").await.unwrap();
    assert_eq!(store.list_keys().await.unwrap(), vec!["b"]);
}

#[tokio::test]
async fn test_caches_survive_reopen_on_sqlite() {
    let store = SqliteStore::in_memory().await.unwrap();
    let tilapia = CommodityKey::named("Tilapia");
    let record = PriceRecord::new(tilapia.clone(), 153.03, parse_date("2025-10-18").unwrap())
        .with_category("FISH PRODUCTS")
        .with_source("weekly_market_survey");

    {
        let tracker = TrackerBuilder::new().open(store.clone()).await.unwrap();
        tracker.record_price(record).await.unwrap();
        tracker.regenerate_forecasts().await.unwrap();
        tracker.flush().await.unwrap();
    }

    let clock = Arc::new(SystemClock);
    let prices = LocalPriceCache::open(store.clone(), clock.clone()).await;
    let history = PriceHistory::open(store.clone(), clock.clone()).await;
    let forecasts = LocalForecastCache::open(store.clone(), clock).await;

    assert_eq!(prices.get_one(&tilapia).await.unwrap().record.price, 153.03);
    let series = history.series(&tilapia).await;
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].source, "weekly_market_survey");
    assert_eq!(forecasts.get_one(&tilapia).await.unwrap().current_price, 153.03);

    let keys = store.list_keys().await.unwrap();
    for key in [
        "latest_prices_cache",
        "latest_prices_last_sync",
        "ml_forecasts_cache",
        "ml_forecasts_last_sync",
        "price_history_cache",
        "price_history_last_sync",
    ] {
        assert!(keys.contains(&key.to_string()), "missing {}", key);
    }
}

#[tokio::test]
async fn test_corrupt_sqlite_blob_opens_empty() {
    let store = SqliteStore::in_memory().await.unwrap();
    store.set("latest_prices_cache", "{ broken").await.unwrap();

    let prices = LocalPriceCache::open(store.clone(), Arc::new(SystemClock)).await;
    assert!(prices.get_all().await.is_empty());

    let tilapia = CommodityKey::named("Tilapia");
    prices
        .upsert(PriceRecord::new(tilapia.clone(), 153.03, parse_date("2025-10-18").unwrap()))
        .await
        .unwrap();
    assert_eq!(prices.len().await, 1);
}
