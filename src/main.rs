//! Main entry point for the price tracker demo
//!
//! Records a few observations (one of them out of order and one while the
//! remote is down), regenerates forecasts and logs what the caches hold.

use agri_price_tracker::tracker::{InMemoryRemote, SqliteStore, TrackerBuilder};
use agri_price_tracker::types::{parse_date, CommodityKey, PriceRecord};
use anyhow::Result;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting price tracker demo");

    let config = TrackerBuilder::new()
        .with_remote_timeout(500)
        .with_retries(1, 50)
        .build_config();
    let store = SqliteStore::new(config.sqlite_max_connections).await?;
    let remote = InMemoryRemote::new();
    let tracker = TrackerBuilder::new()
        .with_config(config)
        .with_remote(remote.clone())
        .open(store)
        .await?;

    let rice = CommodityKey::new("Rice", "Premium", "5%-broken");
    let tilapia = CommodityKey::named("Tilapia");

    let observations = vec![
        PriceRecord::new(rice.clone(), 45.00, parse_date("2024-01-01")?),
        PriceRecord::new(rice.clone(), 46.35, parse_date("2024-01-08")?),
        PriceRecord::new(rice.clone(), 47.00, parse_date("2024-01-15")?),
        PriceRecord::new(tilapia.clone(), 153.03, parse_date("2025-10-18")?),
        // Arrives late: must not replace the 2025-10-18 price.
        PriceRecord::new(tilapia.clone(), 140.00, parse_date("2025-10-17")?),
    ];

    for record in observations {
        let outcome = tracker
            .record_price(record.with_unit("kg").with_source("weekly_market_survey"))
            .await?;
        info!("{} -> {}", outcome.kind.as_str(), outcome.record_id);
    }

    remote.set_online(false);
    let outcome = tracker
        .record_price(
            PriceRecord::new(tilapia.clone(), 155.50, parse_date("2025-10-19")?)
                .with_category("FISH PRODUCTS")
                .with_unit("kg"),
        )
        .await?;
    info!("{}", outcome.message);
    remote.set_online(true);

    let summary = tracker.regenerate_forecasts().await?;
    info!(
        "Forecasts regenerated: {} generated, {} skipped",
        summary.generated, summary.skipped
    );

    for entry in tracker.prices().get_all().await {
        info!(
            "Latest {}: {:.2} on {} ({})",
            entry.record.key, entry.record.price, entry.record.date, entry.source_record_id
        );
    }

    for forecast in tracker.forecasts().get_all().await {
        info!(
            "Forecast {}: {} {:.2} -> week {:.2}, month {:.2}, confidence {}% [{}]",
            forecast.key,
            forecast.trend.as_str(),
            forecast.current_price,
            forecast.next_week_forecast,
            forecast.next_month_forecast,
            forecast.confidence,
            forecast.factors.join(", ")
        );
    }

    tracker.flush().await?;
    info!("Demo completed. Database file 'price_tracker.db' holds the caches.");

    Ok(())
}
