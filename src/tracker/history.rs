//! Local price history - every accepted observation, superseded ones included.
//!
//! This is the forecast generator's input. One record is kept per
//! `(identity, date)`; a second observation for the same day amends it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;
use crate::tracker::clock::Clock;
use crate::tracker::storage::{load_list, load_timestamp, remove_list, save_list, KeyValueStore};
use crate::types::{CacheMetadata, CommodityKey, PriceRecord};

pub const PRICE_HISTORY_KEY: &str = "price_history_cache";
pub const PRICE_HISTORY_SYNC_KEY: &str = "price_history_last_sync";

/// Durable log of price observations.
pub struct PriceHistory {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    records: RwLock<Vec<PriceRecord>>,
    metadata: RwLock<CacheMetadata>,
}

impl PriceHistory {
    pub async fn open(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Arc<Self> {
        let records: Vec<PriceRecord> = load_list(store.as_ref(), PRICE_HISTORY_KEY).await;
        let last_sync = load_timestamp(store.as_ref(), PRICE_HISTORY_SYNC_KEY).await;

        info!("PriceHistory opened with {} records", records.len());

        Arc::new(Self {
            store,
            clock,
            records: RwLock::new(records),
            metadata: RwLock::new(CacheMetadata { last_sync }),
        })
    }

    /// Add one observation.
    ///
    /// Returns the record it replaced when it amended an existing day. On a
    /// failed write the in-memory history is left as it was.
    pub async fn append(&self, record: PriceRecord) -> Result<Option<PriceRecord>> {
        record.validate()?;

        let mut records = self.records.write().await;
        let previous = merge_into(&mut records, record.clone());

        if let Err(e) = self.persist(&records).await {
            restore(&mut records, &record, previous);
            return Err(e);
        }

        debug!(
            "History {} {} on {}",
            if previous.is_some() { "amended" } else { "appended" },
            record.key,
            record.date
        );
        Ok(previous)
    }

    /// Take back an [`append`](Self::append) whose follow-up write failed.
    ///
    /// Does nothing when the day has been written again since.
    pub(crate) async fn undo(&self, record: &PriceRecord, previous: Option<PriceRecord>) -> Result<()> {
        let mut records = self.records.write().await;
        if restore(&mut records, record, previous) {
            self.persist(&records).await?;
            debug!("History write for {} on {} undone", record.key, record.date);
        }
        Ok(())
    }

    /// Date-ordered series for one identity.
    pub async fn series(&self, key: &CommodityKey) -> Vec<PriceRecord> {
        let mut series: Vec<PriceRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| &r.key == key)
            .cloned()
            .collect();
        series.sort_by_key(|r| r.date);
        series
    }

    /// Copy of every record.
    pub async fn snapshot(&self) -> Vec<PriceRecord> {
        self.records.read().await.clone()
    }

    /// Snapshot grouped by identity, each group date-ordered.
    pub async fn grouped(&self) -> BTreeMap<CommodityKey, Vec<PriceRecord>> {
        group_by_identity(self.snapshot().await)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn metadata(&self) -> CacheMetadata {
        self.metadata.read().await.clone()
    }

    pub async fn flush(&self) -> Result<()> {
        let records = self.records.read().await;
        self.persist(&records).await
    }

    pub async fn clear(&self) -> Result<()> {
        let mut records = self.records.write().await;
        remove_list(self.store.as_ref(), PRICE_HISTORY_KEY, PRICE_HISTORY_SYNC_KEY).await?;
        records.clear();
        self.metadata.write().await.last_sync = None;
        info!("Cleared price history");
        Ok(())
    }

    async fn persist(&self, records: &[PriceRecord]) -> Result<()> {
        let now = self.clock.now();
        save_list(
            self.store.as_ref(),
            PRICE_HISTORY_KEY,
            PRICE_HISTORY_SYNC_KEY,
            records,
            now,
        )
        .await?;
        self.metadata.write().await.last_sync = Some(now);
        Ok(())
    }
}

/// Insert or amend on exact `(identity, date)` match. Returns the replaced record.
fn merge_into(records: &mut Vec<PriceRecord>, record: PriceRecord) -> Option<PriceRecord> {
    match records
        .iter_mut()
        .find(|r| r.key == record.key && r.date == record.date)
    {
        Some(existing) => Some(std::mem::replace(existing, record)),
        None => {
            records.push(record);
            None
        }
    }
}

/// Put back what `merge_into` displaced, if `record` is still the stored value.
fn restore(records: &mut Vec<PriceRecord>, record: &PriceRecord, previous: Option<PriceRecord>) -> bool {
    let Some(index) = records.iter().position(|r| r == record) else {
        return false;
    };
    match previous {
        Some(previous) => records[index] = previous,
        None => {
            records.remove(index);
        }
    }
    true
}

/// Group records by identity with each group sorted by date.
pub fn group_by_identity(records: Vec<PriceRecord>) -> BTreeMap<CommodityKey, Vec<PriceRecord>> {
    let mut groups: BTreeMap<CommodityKey, Vec<PriceRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.key.clone()).or_default().push(record);
    }
    for series in groups.values_mut() {
        series.sort_by_key(|r| r.date);
    }
    groups
}
