use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// One daily observation from the market-data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub date: NaiveDate,
    pub close: f64,
    pub adj_close: f64,
}

impl Bar {
    pub fn from_timestamp(timestamp: i64, close: f64, adj_close: f64) -> Option<Self> {
        let date = DateTime::from_timestamp(timestamp, 0)?.date_naive();
        Some(Self {
            timestamp,
            date,
            close,
            adj_close,
        })
    }
}

/// Ordered daily price history for one symbol. Bars are kept sorted by
/// timestamp and never mutated after construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    bars: Vec<Bar>,
}

impl PriceSeries {
    pub fn new(symbol: &str, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        Self {
            symbol: symbol.trim().to_string(),
            bars,
        }
    }

    /// Synthetic series with one bar per calendar day starting at the epoch.
    pub fn from_closes(symbol: &str, closes: &[f64]) -> Self {
        let bars = closes
            .iter()
            .enumerate()
            .filter_map(|(i, c)| Bar::from_timestamp(i as i64 * 86_400, *c, *c))
            .collect();
        Self::new(symbol, bars)
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Adjusted closes in trading-day order.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.adj_close).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }
}
