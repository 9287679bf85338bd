use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Url;
use serde::Deserialize;

use crate::error::AppError;
use crate::model::series::{Bar, PriceSeries};

pub const DEFAULT_CHART_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartData>>,
    #[serde(default)]
    error: Option<ChartApiError>,
}

#[derive(Debug, Deserialize)]
struct ChartApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteBlock>,
    #[serde(default)]
    adjclose: Vec<AdjCloseBlock>,
}

#[derive(Debug, Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseBlock {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

pub struct YahooClient {
    http: reqwest::Client,
    base_url: Url,
}

impl YahooClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        // The chart endpoint rejects requests without a browser-like agent.
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) sandbox-forecast"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build market data HTTP client")?;
        let base_url = Url::parse(base_url.trim())
            .with_context(|| format!("invalid chart base URL '{}'", base_url))?;
        if base_url.cannot_be_a_base() {
            return Err(
                AppError::Config(format!("chart base URL '{}' cannot take a path", base_url)).into(),
            );
        }
        Ok(Self { http, base_url })
    }

    /// `{base_url}/{symbol}` with the symbol percent-encoded as one path segment.
    pub fn chart_url(&self, symbol: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(symbol.trim());
        }
        url
    }

    fn compact_error_body(body: &str) -> String {
        let normalized = body.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.len() > 180 {
            let cut = (0..=180)
                .rev()
                .find(|i| normalized.is_char_boundary(*i))
                .unwrap_or(0);
            format!("{}...", &normalized[..cut])
        } else {
            normalized
        }
    }

    /// Raw chart-API body for daily bars in `[start, end]` (both inclusive).
    pub async fn fetch_daily_raw(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<String> {
        let period1 = unix_midnight(start)?;
        let period2 = unix_midnight(
            end.checked_add_days(Days::new(1))
                .context("end date out of range")?,
        )?;
        let url = self.chart_url(symbol);
        let (p1, p2) = (period1.to_string(), period2.to_string());

        let response = self
            .http
            .get(url)
            .query(&[
                ("period1", p1.as_str()),
                ("period2", p2.as_str()),
                ("interval", "1d"),
                ("events", "history"),
            ])
            .send()
            .await
            .context("chart request HTTP failed")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("chart response body read failed")?;
        if !status.is_success() {
            return Err(AppError::MarketData(format!(
                "HTTP {} for {}: {}",
                status,
                symbol,
                Self::compact_error_body(&body)
            ))
            .into());
        }
        tracing::debug!(symbol, bytes = body.len(), "fetched chart response");
        Ok(body)
    }

    pub async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries> {
        let body = self.fetch_daily_raw(symbol, start, end).await?;
        parse_chart_response(symbol, &body)
    }
}

fn unix_midnight(date: NaiveDate) -> Result<i64> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .with_context(|| format!("invalid date {}", date))
}

/// Builds a series from a chart-API body. Adjusted closes are preferred;
/// plain closes fill in when the adjclose block is missing. Rows without a
/// positive finite price are skipped.
pub fn parse_chart_response(symbol: &str, body: &str) -> Result<PriceSeries> {
    let envelope: ChartEnvelope =
        serde_json::from_str(body).map_err(AppError::from).context("chart JSON parse failed")?;
    if let Some(err) = envelope.chart.error {
        return Err(AppError::MarketData(format!("{}: {}", err.code, err.description)).into());
    }
    let data = envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| AppError::MarketData(format!("empty chart result for {}", symbol)))?;

    let closes = data.indicators.quote.first().map(|q| q.close.as_slice());
    let adjcloses = data
        .indicators
        .adjclose
        .first()
        .map(|a| a.adjclose.as_slice());

    let mut bars = Vec::with_capacity(data.timestamp.len());
    for (i, ts) in data.timestamp.iter().enumerate() {
        let close = closes.and_then(|c| c.get(i).copied().flatten());
        let adj = adjcloses.and_then(|a| a.get(i).copied().flatten()).or(close);
        let Some(adj) = adj.filter(|v| v.is_finite() && *v > 0.0) else {
            continue;
        };
        let close = close.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(adj);
        if let Some(bar) = Bar::from_timestamp(*ts, close, adj) {
            bars.push(bar);
        }
    }
    if bars.is_empty() {
        return Err(AppError::MarketData(format!("no usable prices for {}", symbol)).into());
    }
    Ok(PriceSeries::new(symbol, bars))
}
