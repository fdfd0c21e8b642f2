use chrono::{DateTime, NaiveDate, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// One daily close of an equity, adjusted for splits and dividends.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub adjusted_close: f64,
}

/// Latest equity quote used as the spot price for scoring.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StockQuote {
    pub symbol: SmolStr,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
    /// Synthetic quote produced by the fallback generator.
    #[serde(default)]
    pub fallback: bool,
}

impl StockQuote {
    /// Percentage move from the session open.
    pub fn change_percent(&self) -> f64 {
        if self.open <= 0.0 {
            return 0.0;
        }
        (self.price - self.open) / self.open * 100.0
    }
}
