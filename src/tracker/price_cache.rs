//! Local price cache - the durable "latest known price per commodity" view.
//!
//! Writes go through a recency gate:
//! - unknown identity: applied;
//! - strictly newer date: applied;
//! - same date: applied as an amendment of that day's value;
//! - older date: rejected as superseded, cache unchanged.
//!
//! This component never talks to the network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::tracker::clock::Clock;
use crate::tracker::storage::{load_list, load_timestamp, remove_list, save_list, KeyValueStore};
use crate::types::{CacheMetadata, CommodityKey, LatestPriceEntry, PriceRecord, UpsertReason, UpsertResult};

pub const LATEST_PRICES_KEY: &str = "latest_prices_cache";
pub const LATEST_PRICES_SYNC_KEY: &str = "latest_prices_last_sync";

/// Durable map from identity to its latest price.
pub struct LocalPriceCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    entries: RwLock<BTreeMap<CommodityKey, LatestPriceEntry>>,
    /// Bumped under the `entries` write lock on every change.
    version: AtomicU64,
    /// Version of the last snapshot written to the store. Writes never go backwards.
    persisted: Mutex<u64>,
    metadata: RwLock<CacheMetadata>,
    /// One async mutex per identity so the gate's read-then-write cannot race.
    identity_locks: Cache<CommodityKey, Arc<Mutex<()>>>,
}

impl LocalPriceCache {
    /// Load the cache from `store`. Corrupt contents start the cache empty.
    pub async fn open(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Arc<Self> {
        let stored: Vec<LatestPriceEntry> = load_list(store.as_ref(), LATEST_PRICES_KEY).await;
        let last_sync = load_timestamp(store.as_ref(), LATEST_PRICES_SYNC_KEY).await;

        let entries: BTreeMap<CommodityKey, LatestPriceEntry> = stored
            .into_iter()
            .map(|entry| (entry.record.key.clone(), entry))
            .collect();

        info!("LocalPriceCache opened with {} latest prices", entries.len());

        Arc::new(Self {
            store,
            clock,
            entries: RwLock::new(entries),
            version: AtomicU64::new(0),
            persisted: Mutex::new(0),
            metadata: RwLock::new(CacheMetadata { last_sync }),
            identity_locks: Cache::builder().build(),
        })
    }

    /// All cached entries ordered by identity. Empty when nothing is cached.
    pub async fn get_all(&self) -> Vec<LatestPriceEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn get_one(&self, key: &CommodityKey) -> Option<LatestPriceEntry> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn metadata(&self) -> CacheMetadata {
        self.metadata.read().await.clone()
    }

    /// Recency-gated upsert with an offline record id.
    pub async fn upsert(&self, record: PriceRecord) -> Result<UpsertResult> {
        let id = offline_record_id(&record);
        self.upsert_with_id(record, id).await
    }

    /// Recency-gated upsert keeping `source_record_id` as the back-reference.
    #[instrument(skip(self, record, source_record_id), fields(key = %record.key, date = %record.date))]
    pub async fn upsert_with_id(
        &self,
        record: PriceRecord,
        source_record_id: String,
    ) -> Result<UpsertResult> {
        record.validate()?;

        let lock = self.identity_lock(&record.key).await;
        let _guard = lock.lock().await;

        let existing_date = self.entries.read().await.get(&record.key).map(|e| e.record.date);
        let reason = match existing_date {
            None => UpsertReason::Created,
            Some(current) if record.date > current => UpsertReason::Newer,
            Some(current) if record.date == current => UpsertReason::Amended,
            Some(current) => {
                debug!(
                    "Keeping cached {} for {}; {} is older",
                    current, record.key, record.date
                );
                return Ok(UpsertResult::superseded());
            }
        };

        let now = self.clock.now();
        let key = record.key.clone();
        let entry = LatestPriceEntry {
            record,
            last_updated: now,
            source_record_id,
        };

        let (previous, version, snapshot) = {
            let mut entries = self.entries.write().await;
            let previous = entries.insert(key.clone(), entry);
            let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
            (previous, version, entries.values().cloned().collect::<Vec<_>>())
        };

        // Other identities keep writing while this snapshot goes to the store.
        if let Err(e) = self.persist(version, &snapshot, now).await {
            // Roll back so memory never runs ahead of the store. The identity
            // lock is still held, so no other write touched this entry.
            let mut entries = self.entries.write().await;
            match previous {
                Some(prev) => entries.insert(key, prev),
                None => entries.remove(&key),
            };
            self.version.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }

        self.metadata.write().await.last_sync = Some(now);
        debug!("Cache entry for {} {}", key, reason.as_str());

        Ok(UpsertResult::applied(reason))
    }

    /// True when the cache was never synced or the last sync is older than `ttl`.
    pub async fn needs_refresh(&self, ttl: Duration) -> bool {
        is_older_than(self.metadata.read().await.last_sync, self.clock.now(), ttl)
    }

    /// Rewrite the current contents to the store.
    pub async fn flush(&self) -> Result<()> {
        let (version, snapshot) = {
            let entries = self.entries.read().await;
            (
                self.version.load(Ordering::SeqCst),
                entries.values().cloned().collect::<Vec<_>>(),
            )
        };
        let at = self
            .metadata
            .read()
            .await
            .last_sync
            .unwrap_or_else(|| self.clock.now());
        self.persist(version, &snapshot, at).await
    }

    /// Drop every entry from memory and the store.
    pub async fn clear(&self) -> Result<()> {
        let mut persisted = self.persisted.lock().await;
        let mut entries = self.entries.write().await;
        remove_list(self.store.as_ref(), LATEST_PRICES_KEY, LATEST_PRICES_SYNC_KEY).await?;
        entries.clear();
        // In-flight snapshots predate the clear and must not be written.
        *persisted = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        self.metadata.write().await.last_sync = None;
        info!("Cleared latest prices cache");
        Ok(())
    }

    async fn identity_lock(&self, key: &CommodityKey) -> Arc<Mutex<()>> {
        self.identity_locks
            .get_with(key.clone(), async { Arc::new(Mutex::new(())) })
            .await
    }

    /// Write the snapshot taken at `version` unless a later one already landed.
    async fn persist(
        &self,
        version: u64,
        snapshot: &[LatestPriceEntry],
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let mut persisted = self.persisted.lock().await;
        if version < *persisted {
            debug!("Snapshot {} already covered by {}", version, *persisted);
            return Ok(());
        }
        save_list(
            self.store.as_ref(),
            LATEST_PRICES_KEY,
            LATEST_PRICES_SYNC_KEY,
            snapshot,
            at,
        )
        .await?;
        *persisted = version;
        Ok(())
    }
}

/// Placeholder back-reference for records that never reached the remote.
pub fn offline_record_id(record: &PriceRecord) -> String {
    format!("offline_{}_{}", record.date, record.key.slug())
}

/// Staleness rule shared by the caches: no sync at all counts as stale.
pub(crate) fn is_older_than(
    last_sync: Option<chrono::DateTime<chrono::Utc>>,
    now: chrono::DateTime<chrono::Utc>,
    ttl: Duration,
) -> bool {
    let Some(last_sync) = last_sync else {
        return true;
    };
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now - last_sync > ttl,
        // A TTL too large for chrono never expires.
        Err(_) => false,
    }
}
