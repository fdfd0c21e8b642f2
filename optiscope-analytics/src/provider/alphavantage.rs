use super::{OptionChainSource, PriceHistorySource, QuoteSource};
use crate::{
    clock::Clock,
    config::AnalyticsConfig,
    de::{de_lenient_f64, de_lenient_u64, lenient_f64},
    error::ProviderError,
    model::{OptionContract, OptionKind, PriceBar, StockQuote},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

const INTRADAY_SERIES_KEY: &str = "Time Series (5min)";
const DAILY_SERIES_KEY: &str = "Time Series (Daily)";

/// Lookbacks above this need `outputsize=full`.
const COMPACT_OUTPUT_BARS: usize = 100;

/// [`QuoteSource`], [`PriceHistorySource`] and [`OptionChainSource`] backed by
/// the AlphaVantage query API.
#[derive(Clone)]
pub struct AlphaVantageClient {
    http: reqwest::Client,
    query_url: Url,
    api_key: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AlphaVantageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaVantageClient")
            .field("query_url", &self.query_url.as_str())
            .finish_non_exhaustive()
    }
}

impl AlphaVantageClient {
    pub fn new(config: &AnalyticsConfig, clock: Arc<dyn Clock>) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let query_url = Url::parse(&config.api_base_url)
            .and_then(|base| base.join("query"))
            .map_err(|error| {
                ProviderError::Transport(format!(
                    "invalid base url {}: {error}",
                    config.api_base_url
                ))
            })?;

        Ok(Self {
            http,
            query_url,
            api_key: config.api_key.clone(),
            clock,
        })
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let mut url = self.query_url.clone();
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("apikey", &self.api_key);

        debug!(?params, "alphavantage request");

        let response = self.http.get(url).send().await?;
        if let Err(error) = response.error_for_status_ref() {
            return Err(match response.status() {
                StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(error.to_string()),
                _ => ProviderError::from(error),
            });
        }

        let body = response.json::<Value>().await?;
        check_notice(&body)?;
        Ok(body)
    }
}

#[async_trait]
impl QuoteSource for AlphaVantageClient {
    async fn latest_quote(&self, symbol: &str) -> Result<StockQuote, ProviderError> {
        let body = self
            .query(&[
                ("function", "TIME_SERIES_INTRADAY"),
                ("symbol", symbol),
                ("interval", "5min"),
            ])
            .await?;

        parse_intraday_quote(symbol, &body, self.clock.now())
    }
}

#[async_trait]
impl PriceHistorySource for AlphaVantageClient {
    async fn daily_prices(
        &self,
        symbol: &str,
        lookback: usize,
    ) -> Result<Vec<PriceBar>, ProviderError> {
        let output_size = if lookback + 1 > COMPACT_OUTPUT_BARS {
            "full"
        } else {
            "compact"
        };

        let body = self
            .query(&[
                ("function", "TIME_SERIES_DAILY_ADJUSTED"),
                ("symbol", symbol),
                ("outputsize", output_size),
            ])
            .await?;

        parse_daily_prices(&body, lookback + 1)
    }
}

#[async_trait]
impl OptionChainSource for AlphaVantageClient {
    async fn option_chain(
        &self,
        symbol: &str,
        as_of: Option<NaiveDate>,
    ) -> Result<Vec<OptionContract>, ProviderError> {
        let date = as_of.map(|date| date.format("%Y-%m-%d").to_string());
        let mut params = vec![("function", "HISTORICAL_OPTIONS"), ("symbol", symbol)];
        if let Some(date) = date.as_deref() {
            params.push(("date", date));
        }

        let body = self.query(&params).await?;
        let day = match as_of {
            Some(date) => ChainDay::Historical(date),
            None => ChainDay::Live(self.clock.today()),
        };
        let contracts = parse_option_chain(symbol, &body, day)?;

        debug!(%symbol, ?as_of, contracts = contracts.len(), "option chain fetched");
        Ok(contracts)
    }
}

/// Map the API's in-band error notices onto [`ProviderError`].
pub fn check_notice(body: &Value) -> Result<(), ProviderError> {
    if let Some(message) = body.get("Error Message").and_then(Value::as_str) {
        return Err(ProviderError::Api(message.to_string()));
    }

    if let Some(message) = body.get("Note").and_then(Value::as_str) {
        return Err(ProviderError::RateLimited(message.to_string()));
    }

    if let Some(message) = body.get("Information").and_then(Value::as_str) {
        let lower = message.to_ascii_lowercase();
        return Err(
            if lower.contains("rate limit") || lower.contains("call frequency") {
                ProviderError::RateLimited(message.to_string())
            } else {
                ProviderError::Unavailable(message.to_string())
            },
        );
    }

    Ok(())
}

fn series<'a>(body: &'a Value, key: &str) -> Result<&'a serde_json::Map<String, Value>, ProviderError> {
    body.get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| ProviderError::Parse(format!("response missing {key}")))
}

fn field(bar: &Value, key: &str) -> f64 {
    bar.get(key).map(lenient_f64).unwrap_or_default()
}

/// Newest intraday bar as a [`StockQuote`].
pub fn parse_intraday_quote(
    symbol: &str,
    body: &Value,
    fetched_at: DateTime<Utc>,
) -> Result<StockQuote, ProviderError> {
    let (stamp, bar) = series(body, INTRADAY_SERIES_KEY)?
        .iter()
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .ok_or_else(|| ProviderError::Unavailable(format!("no intraday bars for {symbol}")))?;

    let price = field(bar, "4. close");
    if price <= 0.0 {
        return Err(ProviderError::Parse(format!(
            "non-positive close {price} at {stamp} for {symbol}"
        )));
    }

    Ok(StockQuote {
        symbol: SmolStr::new(symbol.to_ascii_uppercase()),
        price,
        open: field(bar, "1. open"),
        high: field(bar, "2. high"),
        low: field(bar, "3. low"),
        volume: field(bar, "5. volume").max(0.0) as u64,
        timestamp: fetched_at,
        fallback: false,
    })
}

/// Up to `limit` daily bars, newest first. Bars without a positive adjusted
/// close are dropped.
pub fn parse_daily_prices(body: &Value, limit: usize) -> Result<Vec<PriceBar>, ProviderError> {
    let mut bars = series(body, DAILY_SERIES_KEY)?
        .iter()
        .filter_map(|(date, bar)| {
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
            let close = match field(bar, "5. adjusted close") {
                close if close > 0.0 => close,
                _ => field(bar, "4. close"),
            };
            (close > 0.0).then(|| PriceBar::new(date, close))
        })
        .collect::<Vec<_>>();

    bars.sort_by(|a, b| b.date.cmp(&a.date));
    bars.truncate(limit);
    Ok(bars)
}

#[derive(Debug, Deserialize)]
struct RawOption {
    #[serde(rename = "contractID", default)]
    contract_id: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    expiration: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    strike: f64,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    last: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    mark: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    bid: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    ask: f64,
    #[serde(default, deserialize_with = "de_lenient_u64")]
    volume: u64,
    #[serde(default, deserialize_with = "de_lenient_u64")]
    open_interest: u64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    implied_volatility: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    delta: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    gamma: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    theta: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    vega: f64,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    rho: f64,
}

/// Day a chain's days to expiry are counted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainDay {
    /// Live chains count from today, whatever trading day the provider last posted.
    Live(NaiveDate),
    /// Historical entries count from their own `date`, else the requested day.
    Historical(NaiveDate),
}

impl ChainDay {
    fn as_of(self, entry_date: Option<&str>) -> NaiveDate {
        match self {
            Self::Live(today) => today,
            Self::Historical(requested) => entry_date
                .and_then(|date| NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok())
                .unwrap_or(requested),
        }
    }
}

impl RawOption {
    fn into_contract(self, symbol: &str, day: ChainDay) -> Option<OptionContract> {
        let contract_id = self.contract_id.filter(|id| !id.trim().is_empty())?;
        let expiration =
            NaiveDate::parse_from_str(self.expiration.as_deref()?.trim(), "%Y-%m-%d").ok()?;
        let kind = OptionKind::parse(self.kind.as_deref()?)?;
        if self.strike <= 0.0 {
            return None;
        }

        let as_of = day.as_of(self.date.as_deref());

        Some(OptionContract {
            contract_id: SmolStr::new(contract_id),
            symbol: SmolStr::new(self.symbol.as_deref().unwrap_or(symbol).to_ascii_uppercase()),
            expiration,
            as_of,
            days_to_expiry: OptionContract::days_between(as_of, expiration),
            strike: self.strike,
            kind,
            bid: self.bid,
            ask: self.ask,
            last_price: self.last,
            mark: self.mark,
            volume: self.volume,
            open_interest: self.open_interest,
            implied_volatility: self.implied_volatility,
            delta: self.delta,
            gamma: self.gamma,
            theta: self.theta,
            vega: self.vega,
            rho: self.rho,
            historical_volatility: None,
            hv_period: None,
        })
    }
}

/// Contracts from a `HISTORICAL_OPTIONS` body, with days to expiry counted
/// from `day`.
pub fn parse_option_chain(
    symbol: &str,
    body: &Value,
    day: ChainDay,
) -> Result<Vec<OptionContract>, ProviderError> {
    let entries = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Parse(format!("option chain for {symbol} missing data")))?;

    let mut dropped = 0usize;
    let contracts = entries
        .iter()
        .filter_map(|entry| {
            let contract = RawOption::deserialize(entry)
                .ok()
                .and_then(|raw| raw.into_contract(symbol, day));
            if contract.is_none() {
                dropped += 1;
            }
            contract
        })
        .collect::<Vec<_>>();

    if dropped > 0 {
        warn!(%symbol, ?day, dropped, "dropped incomplete option entries");
    }

    Ok(contracts)
}
