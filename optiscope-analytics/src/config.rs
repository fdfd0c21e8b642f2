use crate::filter::FilterConfig;
use smol_str::SmolStr;
use std::{path::PathBuf, str::FromStr, time::Duration};
use tracing::warn;

/// Runtime configuration for the analytics pipeline.
///
/// Every field can be supplied through the environment (see
/// [`AnalyticsConfig::from_env`]) and overridden with the `with_*` setters.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    /// Market data provider API key
    pub api_key: String,
    /// Provider base URL
    pub api_base_url: String,
    /// Uniform timeout applied to every outbound fetch
    pub request_timeout: Duration,
    /// Directory holding the daily caches and benchmark artifacts
    pub cache_dir: PathBuf,
    /// Pause between sequential backfill fetches
    pub backfill_call_delay: Duration,
    /// Default backfill window in trading days
    pub backfill_window_days: usize,
    /// Symbol whose live contracts are annotated with benchmark deviation
    pub benchmark_symbol: SmolStr,
    pub filter: FilterConfig,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            api_key: "demo".to_string(),
            api_base_url: "https://www.alphavantage.co".to_string(),
            request_timeout: Duration::from_millis(10_000),
            cache_dir: PathBuf::from("cache"),
            backfill_call_delay: Duration::from_millis(800),
            backfill_window_days: 126,
            benchmark_symbol: SmolStr::new_static("NVDA"),
            filter: FilterConfig::default(),
        }
    }
}

impl AnalyticsConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup, falling back to
    /// defaults for missing or unparseable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let filter = defaults.filter;

        Self {
            api_key: lookup("ALPHAVANTAGE_API_KEY").unwrap_or(defaults.api_key),
            api_base_url: lookup("API_BASE_URL").unwrap_or(defaults.api_base_url),
            request_timeout: Duration::from_millis(parse_or(&lookup, "API_TIMEOUT", 10_000)),
            cache_dir: lookup("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            backfill_call_delay: Duration::from_millis(parse_or(
                &lookup,
                "BACKFILL_CALL_DELAY_MS",
                800,
            )),
            backfill_window_days: parse_or(
                &lookup,
                "BACKFILL_WINDOW_DAYS",
                defaults.backfill_window_days,
            ),
            benchmark_symbol: lookup("BENCHMARK_SYMBOL")
                .map(|symbol| SmolStr::new(symbol.to_ascii_uppercase()))
                .unwrap_or(defaults.benchmark_symbol),
            filter: FilterConfig {
                min_volume: parse_or(&lookup, "MIN_DAILY_VOLUME", filter.min_volume),
                min_open_interest: parse_or(&lookup, "MIN_OPEN_INTEREST", filter.min_open_interest),
                max_spread_percent: parse_or(
                    &lookup,
                    "MAX_BID_ASK_SPREAD_PERCENT",
                    filter.max_spread_percent,
                ),
                min_iv_percent: parse_or(
                    &lookup,
                    "MIN_IMPLIED_VOLATILITY_PERCENT",
                    filter.min_iv_percent,
                ),
                max_iv_percent: parse_or(
                    &lookup,
                    "MAX_IMPLIED_VOLATILITY_PERCENT",
                    filter.max_iv_percent,
                ),
            },
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_backfill_call_delay(mut self, delay: Duration) -> Self {
        self.backfill_call_delay = delay;
        self
    }

    pub fn with_backfill_window_days(mut self, days: usize) -> Self {
        self.backfill_window_days = days;
        self
    }

    pub fn with_benchmark_symbol(mut self, symbol: impl AsRef<str>) -> Self {
        self.benchmark_symbol = SmolStr::new(symbol.as_ref().to_ascii_uppercase());
        self
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(%key, %raw, "ignoring unparseable configuration value");
            default
        }),
        None => default,
    }
}
