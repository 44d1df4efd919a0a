//! Reconciliation coordinator.
//!
//! Owns the write path for price observations: optional remote push, local
//! history, then the recency gate. Remote trouble never aborts the local path.
//! Forecasts are regenerated on demand from a snapshot of the history.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::error::{Result, TrackerError};
use crate::tracker::clock::Clock;
use crate::tracker::config::TrackerConfig;
use crate::tracker::forecast_cache::LocalForecastCache;
use crate::tracker::forecaster::ForecastGenerator;
use crate::tracker::history::PriceHistory;
use crate::tracker::price_cache::{offline_record_id, LocalPriceCache};
use crate::tracker::remote::RemoteGateway;
use crate::types::{CommodityKey, ForecastEntry, PriceRecord, UpsertReason, UpsertResult};

/// Caller-visible classification of a recorded price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    /// First price ever seen for the identity
    CreatedNewCommodity,
    /// Replaced or amended the latest price
    UpdatedAndNowLatest,
    /// Stored in history, but a newer price stays latest
    UpdatedButSuperseded,
    /// Remote push failed; the local cache took the write
    RemoteFailedButCachedLocally,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::CreatedNewCommodity => "created-new-commodity",
            OutcomeKind::UpdatedAndNowLatest => "updated-and-now-latest",
            OutcomeKind::UpdatedButSuperseded => "updated-but-superseded",
            OutcomeKind::RemoteFailedButCachedLocally => "remote-failed-but-cached-locally",
        }
    }
}

/// Result of [`ReconciliationCoordinator::record_price`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationOutcome {
    pub kind: OutcomeKind,
    pub upsert: UpsertResult,
    /// Remote document id, or an offline placeholder
    pub record_id: String,
    pub remote_synced: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegenerationSummary {
    pub generated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub applied: usize,
    pub superseded: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub checked: usize,
    pub applied: usize,
    pub unavailable: usize,
}

/// Ties the caches, the history, the forecaster and the remote together.
pub struct ReconciliationCoordinator {
    config: TrackerConfig,
    prices: Arc<LocalPriceCache>,
    history: Arc<PriceHistory>,
    forecasts: Arc<LocalForecastCache>,
    gateway: Option<RemoteGateway>,
    generator: ForecastGenerator,
}

impl ReconciliationCoordinator {
    pub fn new(
        config: TrackerConfig,
        prices: Arc<LocalPriceCache>,
        history: Arc<PriceHistory>,
        forecasts: Arc<LocalForecastCache>,
        gateway: Option<RemoteGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            prices,
            history,
            forecasts,
            gateway,
            generator: ForecastGenerator::new(clock),
        }
    }

    pub fn prices(&self) -> &Arc<LocalPriceCache> {
        &self.prices
    }

    pub fn history(&self) -> &Arc<PriceHistory> {
        &self.history
    }

    pub fn forecasts(&self) -> &Arc<LocalForecastCache> {
        &self.forecasts
    }

    pub fn gateway(&self) -> Option<&RemoteGateway> {
        self.gateway.as_ref()
    }

    /// Record one price observation.
    ///
    /// Errors are validation problems and local store failures. A remote
    /// failure is reported through the outcome. When the local store fails,
    /// neither the history nor the latest-price cache keeps the record.
    #[instrument(skip(self, record), fields(key = %record.key, date = %record.date))]
    pub async fn record_price(&self, record: PriceRecord) -> Result<ReconciliationOutcome> {
        record.validate()?;

        let (remote_id, remote_error) = match &self.gateway {
            Some(gateway) => match gateway.push(&record).await {
                Ok(pushed) => (Some(pushed.record_id), None),
                Err(e) => {
                    warn!("Remote push failed for {}, continuing offline: {}", record.key, e);
                    (None, Some(e))
                }
            },
            None => (None, None),
        };
        let remote_synced = remote_id.is_some();
        let record_id = remote_id.unwrap_or_else(|| offline_record_id(&record));

        let upsert = self.apply_locally(&record, record_id.clone()).await?;

        let kind = classify(&upsert, remote_error.is_some());
        let message = describe(kind, &record, remote_error.as_ref());
        info!("{} ({})", message, kind.as_str());

        Ok(ReconciliationOutcome {
            kind,
            upsert,
            record_id,
            remote_synced,
            message,
        })
    }

    /// Feed a batch through validation, history and the recency gate. No remote pushes.
    ///
    /// Invalid records are counted and skipped. A local store failure stops the
    /// import; records applied before it stay applied.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn import_records(&self, records: Vec<PriceRecord>) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        for record in records {
            if let Err(e) = record.validate() {
                warn!("Rejected imported record: {}", e);
                summary.rejected += 1;
                continue;
            }

            let record_id = offline_record_id(&record);
            if self.apply_locally(&record, record_id).await?.applied {
                summary.applied += 1;
            } else {
                summary.superseded += 1;
            }
        }

        info!(
            "Import finished: {} applied, {} superseded, {} rejected",
            summary.applied, summary.superseded, summary.rejected
        );
        Ok(summary)
    }

    /// Pull the remote's latest record for every identity known on either side.
    ///
    /// An empty cache is filled from the remote. A remote value only becomes
    /// latest when the gate accepts it.
    #[instrument(skip(self))]
    pub async fn refresh_from_remote(&self) -> Result<RefreshSummary> {
        let mut summary = RefreshSummary::default();
        let Some(gateway) = &self.gateway else {
            warn!("No remote configured; nothing to refresh");
            return Ok(summary);
        };

        let mut keys: BTreeSet<CommodityKey> = self
            .prices
            .get_all()
            .await
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        match gateway.identities().await {
            Ok(remote_keys) => keys.extend(remote_keys),
            Err(TrackerError::RemoteUnavailable(reason)) => {
                warn!("Could not list remote identities, refreshing cached ones: {}", reason);
                summary.unavailable += 1;
            }
            Err(e) => return Err(e),
        }

        for key in keys {
            summary.checked += 1;
            match gateway.latest(&key).await {
                Ok(Some(remote)) => {
                    if remote.record.validate().is_err() {
                        warn!("Ignoring invalid remote record {}", remote.id);
                        continue;
                    }
                    if self.apply_locally(&remote.record, remote.id).await?.applied {
                        summary.applied += 1;
                    }
                }
                Ok(None) => {}
                Err(TrackerError::RemoteUnavailable(reason)) => {
                    warn!("Remote refresh for {} skipped: {}", key, reason);
                    summary.unavailable += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Remote refresh checked {} identities, applied {}, {} unavailable",
            summary.checked, summary.applied, summary.unavailable
        );
        Ok(summary)
    }

    /// Recompute every forecast from a snapshot of the history and replace the cache.
    ///
    /// Identities with a cached latest price but no history are forecast from
    /// that single sample. Safe to call concurrently; the last run wins.
    #[instrument(skip(self))]
    pub async fn regenerate_forecasts(&self) -> Result<RegenerationSummary> {
        let mut groups = self.history.grouped().await;
        for entry in self.prices.get_all().await {
            groups
                .entry(entry.record.key.clone())
                .or_insert_with(|| vec![entry.record]);
        }

        let mut summary = RegenerationSummary::default();
        let mut forecasts = Vec::with_capacity(groups.len());
        for (key, series) in groups {
            match self.generator.generate(&series) {
                Ok(forecast) => forecasts.push(forecast),
                Err(e) => {
                    error!("Skipping forecast for {}: {}", key, e);
                    summary.skipped += 1;
                }
            }
        }

        summary.generated = forecasts.len();
        self.forecasts.replace_all(forecasts).await?;
        info!(
            "Regenerated {} forecasts ({} skipped)",
            summary.generated, summary.skipped
        );
        Ok(summary)
    }

    /// Cached forecast, or one generated on the fly from local data (not persisted).
    pub async fn forecast_for(&self, key: &CommodityKey) -> Result<Option<ForecastEntry>> {
        if let Some(forecast) = self.forecasts.get_one(key).await {
            return Ok(Some(forecast));
        }

        let mut series = self.history.series(key).await;
        if series.is_empty() {
            match self.prices.get_one(key).await {
                Some(entry) => series.push(entry.record),
                None => return Ok(None),
            }
        }
        self.generator.generate(&series).map(Some)
    }

    pub async fn forecasts_stale(&self) -> bool {
        self.forecasts.is_stale(self.config.forecast_ttl()).await
    }

    pub async fn prices_need_refresh(&self) -> bool {
        self.prices.needs_refresh(self.config.price_refresh_ttl()).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.prices.flush().await?;
        self.history.flush().await?;
        self.forecasts.flush().await?;
        Ok(())
    }

    /// History append plus gated upsert, both or neither.
    async fn apply_locally(&self, record: &PriceRecord, record_id: String) -> Result<UpsertResult> {
        let previous = self.history.append(record.clone()).await?;
        match self.prices.upsert_with_id(record.clone(), record_id).await {
            Ok(upsert) => Ok(upsert),
            Err(e) => {
                if let Err(undo) = self.history.undo(record, previous).await {
                    error!("Could not take back history write for {}: {}", record.key, undo);
                }
                Err(e)
            }
        }
    }
}

fn classify(upsert: &UpsertResult, remote_failed: bool) -> OutcomeKind {
    if !upsert.applied {
        OutcomeKind::UpdatedButSuperseded
    } else if remote_failed {
        OutcomeKind::RemoteFailedButCachedLocally
    } else if upsert.reason == UpsertReason::Created {
        OutcomeKind::CreatedNewCommodity
    } else {
        OutcomeKind::UpdatedAndNowLatest
    }
}

fn describe(kind: OutcomeKind, record: &PriceRecord, remote_error: Option<&TrackerError>) -> String {
    let base = match kind {
        OutcomeKind::CreatedNewCommodity => {
            format!("Added {} at {:.2} as a new commodity", record.key, record.price)
        }
        OutcomeKind::UpdatedAndNowLatest => format!(
            "Updated {} to {:.2}, now the latest price",
            record.key, record.price
        ),
        OutcomeKind::UpdatedButSuperseded => format!(
            "Saved {} at {:.2} for {}, but a newer price remains the latest",
            record.key, record.price, record.date
        ),
        OutcomeKind::RemoteFailedButCachedLocally => format!(
            "Saved {} at {:.2} locally; it will not reach the remote until a later sync",
            record.key, record.price
        ),
    };
    match (kind, remote_error) {
        (OutcomeKind::UpdatedButSuperseded, Some(_)) => format!("{} (remote unavailable)", base),
        _ => base,
    }
}
