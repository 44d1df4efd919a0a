//! Remote price store contract and the resilient gateway in front of it.
//!
//! The remote is optional. Every call goes through [`RemoteGateway`], which
//! bounds it with a timeout, retries transient failures and skips the remote
//! entirely while the circuit breaker is cooling down.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, instrument, warn};

use crate::error::{Result, TrackerError};
use crate::tracker::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::tracker::config::TrackerConfig;
use crate::types::{CommodityKey, PriceRecord};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// A price document as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    pub record: PriceRecord,
    pub created_at: DateTime<Utc>,
}

/// Remote document store holding price observations.
#[async_trait]
pub trait RemotePriceStore: Send + Sync {
    /// Find the document for `(name, type, date)`.
    async fn find(&self, key: &CommodityKey, date: NaiveDate) -> anyhow::Result<Option<RemoteRecord>>;

    /// Create a document and return its id.
    async fn create(&self, record: &PriceRecord) -> anyhow::Result<String>;

    /// Overwrite the document with the given id.
    async fn update(&self, id: &str, record: &PriceRecord) -> anyhow::Result<()>;

    /// Newest document for an identity, ordered by date then creation time.
    async fn latest(&self, key: &CommodityKey) -> anyhow::Result<Option<RemoteRecord>>;

    /// Every distinct identity with at least one document, in key order.
    async fn identities(&self) -> anyhow::Result<Vec<CommodityKey>>;
}

fn same_document(key: &CommodityKey, other: &CommodityKey) -> bool {
    key.commodity_name == other.commodity_name && key.commodity_type == other.commodity_type
}

/// In-process remote used by the demo binary and tests.
///
/// Can be switched offline or given artificial latency to exercise the
/// gateway's soft-failure paths.
pub struct InMemoryRemote {
    documents: RwLock<Vec<RemoteRecord>>,
    online: AtomicBool,
    latency_ms: AtomicU64,
    next_id: AtomicU64,
    calls: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            documents: RwLock::new(Vec::new()),
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of store operations attempted, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn documents(&self) -> Vec<RemoteRecord> {
        self.documents.read().await.clone()
    }

    async fn enter(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(anyhow!("remote store is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemotePriceStore for InMemoryRemote {
    async fn find(&self, key: &CommodityKey, date: NaiveDate) -> anyhow::Result<Option<RemoteRecord>> {
        self.enter().await?;
        Ok(self
            .documents
            .read()
            .await
            .iter()
            .find(|d| same_document(&d.record.key, key) && d.record.date == date)
            .cloned())
    }

    async fn create(&self, record: &PriceRecord) -> anyhow::Result<String> {
        self.enter().await?;
        let id = format!("remote_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.documents.write().await.push(RemoteRecord {
            id: id.clone(),
            record: record.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn update(&self, id: &str, record: &PriceRecord) -> anyhow::Result<()> {
        self.enter().await?;
        let mut documents = self.documents.write().await;
        let document = documents
            .iter_mut()
            .find(|d| d.id == id)
            .with_context(|| format!("No remote document with id {}", id))?;
        document.record = record.clone();
        Ok(())
    }

    async fn latest(&self, key: &CommodityKey) -> anyhow::Result<Option<RemoteRecord>> {
        self.enter().await?;
        Ok(self
            .documents
            .read()
            .await
            .iter()
            .enumerate()
            .filter(|(_, d)| &d.record.key == key)
            .max_by_key(|(i, d)| (d.record.date, d.created_at, *i))
            .map(|(_, d)| d.clone()))
    }

    async fn identities(&self) -> anyhow::Result<Vec<CommodityKey>> {
        self.enter().await?;
        let keys: BTreeSet<CommodityKey> = self
            .documents
            .read()
            .await
            .iter()
            .map(|d| d.record.key.clone())
            .collect();
        Ok(keys.into_iter().collect())
    }
}

/// Where a pushed record ended up remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub record_id: String,
    /// `false` when an existing same-day document was updated
    pub created: bool,
}

/// Timeout, retry and circuit-breaker wrapper around a [`RemotePriceStore`].
pub struct RemoteGateway {
    remote: Arc<dyn RemotePriceStore>,
    config: TrackerConfig,
    breaker: Mutex<CircuitBreaker>,
}

impl RemoteGateway {
    pub fn new(remote: Arc<dyn RemotePriceStore>, config: TrackerConfig) -> Self {
        let breaker = CircuitBreaker::new(
            config.circuit_breaker_failure_threshold,
            config.circuit_breaker_cooldown(),
        );
        Self {
            remote,
            config,
            breaker: Mutex::new(breaker),
        }
    }

    pub async fn breaker_state(&self) -> BreakerState {
        self.breaker.lock().await.state()
    }

    /// Update the same-day document if one exists, otherwise create one.
    #[instrument(skip(self, record), fields(key = %record.key, date = %record.date))]
    pub async fn push(&self, record: &PriceRecord) -> Result<PushOutcome> {
        self.guarded("push", || self.push_once(record)).await
    }

    /// Newest remote record for an identity.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn latest(&self, key: &CommodityKey) -> Result<Option<RemoteRecord>> {
        self.guarded("latest", || self.remote.latest(key)).await
    }

    /// Identities the remote holds documents for.
    #[instrument(skip(self))]
    pub async fn identities(&self) -> Result<Vec<CommodityKey>> {
        self.guarded("identities", || self.remote.identities()).await
    }

    async fn push_once(&self, record: &PriceRecord) -> anyhow::Result<PushOutcome> {
        match self.remote.find(&record.key, record.date).await? {
            Some(existing) => {
                self.remote.update(&existing.id, record).await?;
                debug!("Updated remote document {}", existing.id);
                Ok(PushOutcome {
                    record_id: existing.id,
                    created: false,
                })
            }
            None => {
                let id = self.remote.create(record).await?;
                debug!("Created remote document {}", id);
                Ok(PushOutcome {
                    record_id: id,
                    created: true,
                })
            }
        }
    }

    async fn guarded<T, F, Fut>(&self, operation: &str, action: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if !self.breaker.lock().await.is_available() {
            debug!("Skipping remote {}: circuit breaker cooling down", operation);
            return Err(TrackerError::RemoteUnavailable(format!(
                "{} skipped while the remote is cooling down",
                operation
            )));
        }

        let retry_strategy = ExponentialBackoff::from_millis(self.config.remote_retry_base_ms.max(1))
            .max_delay(MAX_RETRY_DELAY)
            .take(self.config.remote_retry_attempts);

        let deadline = self.config.remote_timeout();
        let outcome = timeout(deadline, Retry::spawn(retry_strategy, action)).await;

        let mut breaker = self.breaker.lock().await;
        match outcome {
            Ok(Ok(value)) => {
                breaker.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                breaker.record_failure();
                warn!("Remote {} failed: {:#}", operation, e);
                Err(TrackerError::RemoteUnavailable(format!("{} failed: {:#}", operation, e)))
            }
            Err(_) => {
                breaker.record_failure();
                warn!("Remote {} timed out after {:?}", operation, deadline);
                Err(TrackerError::RemoteUnavailable(format!(
                    "{} timed out after {:?}",
                    operation, deadline
                )))
            }
        }
    }
}
