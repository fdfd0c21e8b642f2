use crate::{
    error::ProviderError,
    model::{OptionContract, PriceBar, StockQuote},
};
use async_trait::async_trait;
use chrono::NaiveDate;

/// AlphaVantage REST client.
pub mod alphavantage;

/// Synthetic market used when the live provider fails.
pub mod fallback;

/// Latest spot quote for an equity.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn latest_quote(&self, symbol: &str) -> Result<StockQuote, ProviderError>;
}

/// Daily adjusted closes, newest first.
#[async_trait]
pub trait PriceHistorySource: Send + Sync {
    async fn daily_prices(&self, symbol: &str, lookback: usize)
    -> Result<Vec<PriceBar>, ProviderError>;
}

/// Option chain as it stood on `as_of`, or on the most recent trading day
/// when `as_of` is `None`.
///
/// Every returned contract has `days_to_expiry` computed relative to its
/// `as_of` date.
#[async_trait]
pub trait OptionChainSource: Send + Sync {
    async fn option_chain(
        &self,
        symbol: &str,
        as_of: Option<NaiveDate>,
    ) -> Result<Vec<OptionContract>, ProviderError>;
}
