//! Local forecast cache.
//!
//! Forecasts are never merged: each run replaces the whole set.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::Result;
use crate::tracker::clock::Clock;
use crate::tracker::price_cache::is_older_than;
use crate::tracker::storage::{load_list, load_timestamp, remove_list, save_list, KeyValueStore};
use crate::types::{CacheMetadata, CommodityKey, ForecastEntry};

pub const FORECASTS_KEY: &str = "ml_forecasts_cache";
pub const FORECASTS_SYNC_KEY: &str = "ml_forecasts_last_sync";

/// Durable map from identity to its latest forecast.
pub struct LocalForecastCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    entries: RwLock<BTreeMap<CommodityKey, ForecastEntry>>,
    metadata: RwLock<CacheMetadata>,
}

impl LocalForecastCache {
    pub async fn open(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Arc<Self> {
        let stored: Vec<ForecastEntry> = load_list(store.as_ref(), FORECASTS_KEY).await;
        let last_sync = load_timestamp(store.as_ref(), FORECASTS_SYNC_KEY).await;

        let entries: BTreeMap<CommodityKey, ForecastEntry> =
            stored.into_iter().map(|f| (f.key.clone(), f)).collect();

        info!("LocalForecastCache opened with {} forecasts", entries.len());

        Arc::new(Self {
            store,
            clock,
            entries: RwLock::new(entries),
            metadata: RwLock::new(CacheMetadata { last_sync }),
        })
    }

    pub async fn get_all(&self) -> Vec<ForecastEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn get_one(&self, key: &CommodityKey) -> Option<ForecastEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Look up by commodity name: exact, then case-insensitive, then substring either way.
    pub async fn find_by_name(&self, name: &str) -> Option<ForecastEntry> {
        let entries = self.entries.read().await;
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }

        entries
            .values()
            .find(|f| f.key.commodity_name == name)
            .or_else(|| {
                entries
                    .values()
                    .find(|f| f.key.commodity_name.to_lowercase() == wanted)
            })
            .or_else(|| {
                entries.values().find(|f| {
                    let have = f.key.commodity_name.to_lowercase();
                    have.contains(&wanted) || wanted.contains(&have)
                })
            })
            .cloned()
    }

    /// Atomically replace every forecast. Later duplicates win.
    pub async fn replace_all(&self, forecasts: Vec<ForecastEntry>) -> Result<()> {
        let next: BTreeMap<CommodityKey, ForecastEntry> =
            forecasts.into_iter().map(|f| (f.key.clone(), f)).collect();
        let now = self.clock.now();

        let mut entries = self.entries.write().await;
        let list: Vec<&ForecastEntry> = next.values().collect();
        save_list(self.store.as_ref(), FORECASTS_KEY, FORECASTS_SYNC_KEY, &list, now).await?;

        info!("Saved {} forecasts to offline cache", next.len());
        *entries = next;
        self.metadata.write().await.last_sync = Some(now);
        Ok(())
    }

    /// True when `now - last_sync` exceeds `ttl`, or when never synced.
    pub async fn is_stale(&self, ttl: Duration) -> bool {
        is_older_than(self.metadata.read().await.last_sync, self.clock.now(), ttl)
    }

    pub async fn metadata(&self) -> CacheMetadata {
        self.metadata.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn flush(&self) -> Result<()> {
        let entries = self.entries.read().await;
        let at = self
            .metadata
            .read()
            .await
            .last_sync
            .unwrap_or_else(|| self.clock.now());
        let list: Vec<&ForecastEntry> = entries.values().collect();
        save_list(self.store.as_ref(), FORECASTS_KEY, FORECASTS_SYNC_KEY, &list, at).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write().await;
        remove_list(self.store.as_ref(), FORECASTS_KEY, FORECASTS_SYNC_KEY).await?;
        entries.clear();
        self.metadata.write().await.last_sync = None;
        info!("Cleared forecasts cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::clock::ManualClock;
    use crate::tracker::storage::MemoryStore;
    use crate::types::Trend;
    use chrono::{TimeZone, Utc};

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 10, 18, 8, 0, 0).unwrap()))
    }

    fn forecast(name: &str, price: f64) -> ForecastEntry {
        ForecastEntry {
            key: CommodityKey::named(name),
            category: "FISH PRODUCTS".to_string(),
            current_price: price,
            predicted_price: price,
            next_week_forecast: price,
            next_month_forecast: price,
            confidence: 65,
            trend: Trend::Stable,
            factors: vec!["Limited historical data".to_string()],
            last_updated: Utc.with_ymd_and_hms(2025, 10, 18, 8, 0, 0).unwrap(),
            record_id: format!("basic_{}", name),
        }
    }

    #[tokio::test]
    async fn test_replace_all_is_wholesale() {
        let cache = LocalForecastCache::open(MemoryStore::new(), clock()).await;
        cache
            .replace_all(vec![forecast("Tilapia", 153.03), forecast("Bangus", 200.0)])
            .await
            .unwrap();
        assert_eq!(cache.len().await, 2);

        cache.replace_all(vec![forecast("Tilapia", 160.0)]).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert!(cache.get_one(&CommodityKey::named("Bangus")).await.is_none());
        assert_eq!(
            cache.get_one(&CommodityKey::named("Tilapia")).await.unwrap().current_price,
            160.0
        );
    }

    #[tokio::test]
    async fn test_staleness() {
        let clock = clock();
        let cache = LocalForecastCache::open(MemoryStore::new(), clock.clone()).await;
        assert!(cache.is_stale(WEEK).await);

        cache.replace_all(vec![forecast("Tilapia", 153.03)]).await.unwrap();
        assert!(!cache.is_stale(WEEK).await);

        clock.advance(chrono::Duration::days(7));
        assert!(!cache.is_stale(WEEK).await);

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.is_stale(WEEK).await);
    }

    #[tokio::test]
    async fn test_find_by_name() {
        let cache = LocalForecastCache::open(MemoryStore::new(), clock()).await;
        cache
            .replace_all(vec![
                forecast("Beef Brisket, Local", 415.11),
                forecast("Tilapia", 153.03),
            ])
            .await
            .unwrap();

        assert_eq!(cache.find_by_name("Tilapia").await.unwrap().current_price, 153.03);
        assert_eq!(cache.find_by_name("tilapia").await.unwrap().current_price, 153.03);
        assert_eq!(cache.find_by_name("brisket").await.unwrap().current_price, 415.11);
        assert!(cache.find_by_name("Galunggong").await.is_none());
        assert!(cache.find_by_name("  ").await.is_none());
    }

    #[tokio::test]
    async fn test_reopen_and_clear() {
        let store = MemoryStore::new();
        let cache = LocalForecastCache::open(store.clone(), clock()).await;
        cache.replace_all(vec![forecast("Tilapia", 153.03)]).await.unwrap();

        let reopened = LocalForecastCache::open(store.clone(), clock()).await;
        assert_eq!(reopened.get_all().await, cache.get_all().await);

        reopened.clear().await.unwrap();
        assert!(reopened.get_all().await.is_empty());
        assert!(reopened.is_stale(WEEK).await);
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_blob_opens_empty() {
        let store = MemoryStore::new();
        store.set(FORECASTS_KEY, "not json at all").await.unwrap();
        let cache = LocalForecastCache::open(store, clock()).await;
        assert!(cache.get_all().await.is_empty());
    }
}
