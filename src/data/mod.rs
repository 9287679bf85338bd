pub mod yahoo;

use anyhow::{Context, Result};

use crate::config::DataConfig;
use crate::model::series::PriceSeries;

pub use yahoo::{parse_chart_response, YahooClient};

/// Loads the configured series, preferring an existing snapshot file over the
/// network. A fresh download is written back to the snapshot path once it has
/// parsed successfully.
pub async fn load_price_series(cfg: &DataConfig) -> Result<PriceSeries> {
    let snapshot = cfg.snapshot_path();
    if let Some(path) = snapshot.as_deref() {
        if path.exists() {
            let body = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read snapshot {}", path.display()))?;
            let series = parse_chart_response(&cfg.symbol, &body)
                .with_context(|| format!("invalid snapshot {}", path.display()))?;
            tracing::info!(
                path = %path.display(),
                bars = series.len(),
                "Loaded price snapshot"
            );
            return Ok(series);
        }
    }

    let (start, end) = cfg.date_range()?;
    let client = YahooClient::new(&cfg.base_url)?;
    let body = client.fetch_daily_raw(&cfg.symbol, start, end).await?;
    let series = parse_chart_response(&cfg.symbol, &body)?;
    tracing::info!(
        symbol = %cfg.symbol,
        bars = series.len(),
        first = ?series.first_date(),
        last = ?series.last_date(),
        "Fetched daily prices"
    );

    if let Some(path) = snapshot.as_deref() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, body.as_bytes())
            .await
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    }
    Ok(series)
}
