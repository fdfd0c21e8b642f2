//! Per-request analysis pipeline.
//!
//! Refreshes the spot price, fetches and filters the live chain (falling back
//! to synthetic data), joins HV by tenor, qualifies and scores every call,
//! and annotates the benchmark symbol with its stored IV benchmark.

use crate::{
    benchmark::{
        BackfillHandle, BackfillProgress, BenchmarkAggregator, BenchmarkDeviation,
        BenchmarkSnapshot, BenchmarkStatus, CancelSignal, FileBenchmarkStore,
    },
    cache::{self, CacheStats, DailyCache, HV_NAMESPACE, PRICE_NAMESPACE},
    clock::Clock,
    config::AnalyticsConfig,
    error::AnalyticsError,
    filter::{FilterConfig, QualificationResult, qualify},
    model::{OptionContract, OptionKind, StockQuote},
    persist,
    provider::{
        OptionChainSource, PriceHistorySource, QuoteSource, alphavantage::AlphaVantageClient,
        fallback::FallbackMarket,
    },
    scoring::{CasScore, CcasScore, Grade, score_cas, score_ccas},
    universe,
    volatility::{compute_historical_volatility, hv_period_for_dte},
};
use chrono::{DateTime, NaiveDate, Utc};
use fnv::FnvHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Upstream collaborators the orchestrator pulls market data from.
#[derive(Clone)]
pub struct MarketSources {
    pub quotes: Arc<dyn QuoteSource>,
    pub history: Arc<dyn PriceHistorySource>,
    pub chains: Arc<dyn OptionChainSource>,
}

impl MarketSources {
    pub fn alphavantage(client: Arc<AlphaVantageClient>) -> Self {
        Self {
            quotes: client.clone(),
            history: client.clone(),
            chains: client,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnalysisRequest {
    pub symbol: SmolStr,
    #[serde(default)]
    pub kind: OptionKind,
    /// Upper bound on days to expiry, inclusive.
    #[serde(default)]
    pub max_days: Option<i64>,
    /// Bypass the cached price.
    #[serde(default)]
    pub refresh: bool,
}

impl AnalysisRequest {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self {
            symbol: SmolStr::new(symbol.as_ref().to_ascii_uppercase()),
            kind: OptionKind::Call,
            max_days: None,
            refresh: false,
        }
    }

    pub fn with_kind(mut self, kind: OptionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_max_days(mut self, max_days: i64) -> Self {
        self.max_days = Some(max_days);
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[display("live")]
    Live,
    #[display("fallback")]
    Fallback,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Grades {
    pub buy_call: Grade,
    pub sell_call: Grade,
    pub covered_call: Grade,
}

/// One live contract with everything derived for it on this request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ContractAnalysis {
    pub contract: OptionContract,
    pub qualification: QualificationResult,
    pub cas: Option<CasScore>,
    pub ccas: Option<CcasScore>,
    pub grades: Option<Grades>,
    pub benchmark: Option<BenchmarkDeviation>,
}

impl ContractAnalysis {
    pub fn buy_call_score(&self) -> Option<u8> {
        self.cas.map(|cas| cas.buy_call.score)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnalysisReport {
    pub symbol: SmolStr,
    pub kind: OptionKind,
    pub quote: StockQuote,
    pub data_source: DataSource,
    pub filter: FilterConfig,
    pub qualified_count: usize,
    /// Ranked by buy-call CAS, unscored contracts last.
    pub contracts: Vec<ContractAnalysis>,
    pub generated_at: DateTime<Utc>,
}

/// Ties the cache, providers, filter, scoring engine and benchmarks together.
pub struct AnalysisOrchestrator {
    config: AnalyticsConfig,
    sources: MarketSources,
    cache: Arc<DailyCache>,
    benchmarks: Arc<BenchmarkAggregator>,
    fallback: FallbackMarket,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AnalysisOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisOrchestrator")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("benchmarks", &self.benchmarks)
            .finish_non_exhaustive()
    }
}

impl AnalysisOrchestrator {
    pub fn new(
        config: AnalyticsConfig,
        sources: MarketSources,
        cache: Arc<DailyCache>,
        benchmarks: Arc<BenchmarkAggregator>,
        fallback: FallbackMarket,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            sources,
            cache,
            benchmarks,
            fallback,
            clock,
        }
    }

    /// Production wiring: AlphaVantage sources, file-backed caches and
    /// benchmark artifacts under `config.cache_dir`.
    pub fn from_config(
        config: AnalyticsConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AnalyticsError> {
        let client = Arc::new(AlphaVantageClient::new(&config, clock.clone())?);
        let sources = MarketSources::alphavantage(client);
        let cache = Arc::new(DailyCache::persistent(&config.cache_dir, clock.clone()));
        let benchmarks = Arc::new(BenchmarkAggregator::new(
            sources.chains.clone(),
            Arc::new(FileBenchmarkStore::new(&config.cache_dir)),
            clock.clone(),
            config.backfill_call_delay,
        ));

        info!(
            cache_dir = %config.cache_dir.display(),
            benchmark_symbol = %config.benchmark_symbol,
            "analysis orchestrator configured"
        );

        Ok(Self::new(
            config,
            sources,
            cache,
            benchmarks,
            FallbackMarket::default(),
            clock,
        ))
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn benchmarks(&self) -> &Arc<BenchmarkAggregator> {
        &self.benchmarks
    }

    pub fn stocks(&self) -> &'static [universe::StockInfo] {
        &universe::STOCKS
    }

    /// Today's quote for `symbol`: cached, else live, else synthetic.
    ///
    /// Synthetic quotes are never cached so the next request retries the
    /// provider.
    pub async fn refresh_price(&self, symbol: &str, force: bool) -> StockQuote {
        let symbol = symbol.to_ascii_uppercase();

        if !force {
            if let Some(quote) = self.cache.get::<StockQuote>(PRICE_NAMESPACE, &symbol) {
                debug!(%symbol, price = quote.price, "price served from cache");
                return quote;
            }
        }

        match self.sources.quotes.latest_quote(&symbol).await {
            Ok(quote) => {
                if let Err(error) = self.cache_set(PRICE_NAMESPACE, &symbol, quote.clone()).await {
                    warn!(%symbol, %error, "failed to cache price");
                }
                info!(%symbol, price = quote.price, "price refreshed");
                quote
            }
            Err(error) => {
                warn!(%symbol, %error, transient = error.is_transient(), "quote unavailable, using fallback price");
                self.fallback.quote(&symbol, self.clock.now())
            }
        }
    }

    /// Annualised HV (%) over `period` trading days.
    ///
    /// Never fails: a cached value is preferred, then a freshly computed one,
    /// then the symbol's static default.
    pub async fn get_or_compute_hv(&self, symbol: &str, period: u32) -> f64 {
        let symbol = symbol.to_ascii_uppercase();
        let key = cache::hv_key(&symbol, period);

        if let Some(hv) = self.cache.get::<f64>(HV_NAMESPACE, &key) {
            debug!(%symbol, period, hv, "hv served from cache");
            return hv;
        }

        let computed = match self
            .sources
            .history
            .daily_prices(&symbol, period as usize)
            .await
        {
            Ok(bars) => compute_historical_volatility(&bars, period as usize),
            Err(error) => Err(AnalyticsError::from(error)),
        };

        match computed {
            Ok(hv) => {
                if let Err(error) = self.cache_set(HV_NAMESPACE, &key, hv).await {
                    warn!(%symbol, period, %error, "failed to cache hv");
                }
                debug!(%symbol, period, hv, "hv computed");
                hv
            }
            Err(error) => {
                let hv = universe::fallback_hv(&symbol);
                warn!(%symbol, period, %error, fallback = hv, "hv unavailable, using static default");
                hv
            }
        }
    }

    /// Run the full analysis pipeline for one request.
    ///
    /// Always produces a report; provider failures switch the report to
    /// synthetic data flagged with [`DataSource::Fallback`].
    pub async fn analyze(&self, request: &AnalysisRequest) -> AnalysisReport {
        let symbol = SmolStr::new(request.symbol.to_ascii_uppercase());
        let quote = self.refresh_price(&symbol, request.refresh).await;

        let (data_source, contracts) = match self.live_contracts(&symbol, request).await {
            Ok(contracts) => (DataSource::Live, contracts),
            Err(error) => {
                warn!(%symbol, %error, "live option chain unusable, using fallback chain");
                let chain = self
                    .fallback
                    .option_chain(&symbol, quote.price, self.clock.today());
                (DataSource::Fallback, live_filter(chain, request))
            }
        };

        let contracts = self.join_hv(&symbol, contracts).await;

        let qualified = contracts
            .iter()
            .map(|contract| qualify(contract, &self.config.filter))
            .collect::<Vec<_>>();

        // Same-expiration peer groups of qualified calls
        let peers: FnvHashMap<NaiveDate, Vec<OptionContract>> = contracts
            .iter()
            .zip(&qualified)
            .filter(|(contract, result)| result.is_qualified && contract.is_call())
            .map(|(contract, _)| (contract.expiration, contract.clone()))
            .into_group_map()
            .into_iter()
            .collect();

        let snapshot = self.benchmark_for(&symbol).await;

        let mut analyses = contracts
            .into_iter()
            .zip(qualified)
            .map(|(contract, qualification)| {
                let scored = qualification.is_qualified && contract.is_call();
                let cas = scored.then(|| {
                    let group = peers
                        .get(&contract.expiration)
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    score_cas(&contract, group)
                });
                let ccas = scored.then(|| score_ccas(&contract, quote.price));
                let grades = cas.zip(ccas).map(|(cas, ccas)| Grades {
                    buy_call: Grade::from_score(cas.buy_call.score),
                    sell_call: Grade::from_score(cas.sell_call.score),
                    covered_call: Grade::from_score(ccas.ccas_score),
                });
                let benchmark = snapshot
                    .as_ref()
                    .and_then(|snapshot| BenchmarkDeviation::compute(snapshot, &contract));

                ContractAnalysis {
                    contract,
                    qualification,
                    cas,
                    ccas,
                    grades,
                    benchmark,
                }
            })
            .collect::<Vec<_>>();

        analyses.sort_by(|a, b| b.buy_call_score().cmp(&a.buy_call_score()));

        let qualified_count = analyses
            .iter()
            .filter(|analysis| analysis.qualification.is_qualified)
            .count();

        info!(
            %symbol,
            %data_source,
            contracts = analyses.len(),
            qualified = qualified_count,
            "analysis complete"
        );

        AnalysisReport {
            symbol,
            kind: request.kind,
            quote,
            data_source,
            filter: self.config.filter,
            qualified_count,
            contracts: analyses,
            generated_at: self.clock.now(),
        }
    }

    /// Start a background backfill; `window_days` defaults to the configured
    /// window.
    pub fn start_backfill(
        &self,
        symbol: &str,
        window_days: Option<usize>,
    ) -> Result<BackfillHandle, AnalyticsError> {
        self.benchmarks.spawn(
            symbol,
            window_days.unwrap_or(self.config.backfill_window_days),
        )
    }

    /// Run a backfill on the current task, reporting through `progress`.
    pub async fn run_benchmark_backfill(
        &self,
        symbol: &str,
        window_days: usize,
        progress: &mpsc::UnboundedSender<BackfillProgress>,
        cancel: CancelSignal,
    ) -> Result<BenchmarkSnapshot, AnalyticsError> {
        self.benchmarks
            .run(symbol, window_days, progress, cancel)
            .await
    }

    pub async fn load_latest_benchmark(
        &self,
        symbol: &str,
    ) -> Result<Option<BenchmarkSnapshot>, AnalyticsError> {
        self.benchmarks.load_latest(symbol).await
    }

    pub async fn benchmark_status(&self, symbol: &str) -> Result<BenchmarkStatus, AnalyticsError> {
        self.benchmarks.status(symbol).await
    }

    pub fn cache_stats(&self) -> Vec<CacheStats> {
        [PRICE_NAMESPACE, HV_NAMESPACE]
            .into_iter()
            .map(|namespace| self.cache.stats(namespace))
            .collect()
    }

    pub fn clear_cache(&self, namespace: &str) -> Result<(), AnalyticsError> {
        self.cache.clear(namespace)?;
        info!(%namespace, "cache cleared");
        Ok(())
    }

    async fn live_contracts(
        &self,
        symbol: &SmolStr,
        request: &AnalysisRequest,
    ) -> Result<Vec<OptionContract>, AnalyticsError> {
        let chain = self.sources.chains.option_chain(symbol, None).await?;
        let fetched = chain.len();
        let contracts = live_filter(chain, request);

        debug!(%symbol, fetched, usable = contracts.len(), "live chain filtered");
        if contracts.is_empty() {
            return Err(AnalyticsError::NoContracts {
                symbol: symbol.clone(),
            });
        }
        Ok(contracts)
    }

    /// Write through the cache from the blocking pool.
    async fn cache_set<T>(
        &self,
        namespace: &'static str,
        key: &str,
        payload: T,
    ) -> Result<(), AnalyticsError>
    where
        T: Serialize + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        let key = key.to_string();
        persist::off_runtime(move || cache.set(namespace, &key, &payload)).await
    }

    /// Attach one HV per distinct tenor-driven period.
    async fn join_hv(
        &self,
        symbol: &str,
        contracts: Vec<OptionContract>,
    ) -> Vec<OptionContract> {
        let mut by_period = FnvHashMap::default();
        let periods: Vec<u32> = contracts
            .iter()
            .map(|contract| hv_period_for_dte(contract.days_to_expiry))
            .unique()
            .collect();
        for period in periods {
            let hv = self.get_or_compute_hv(symbol, period).await;
            by_period.insert(period, hv);
        }

        contracts
            .into_iter()
            .map(|contract| {
                let period = hv_period_for_dte(contract.days_to_expiry);
                match by_period.get(&period) {
                    Some(hv) => contract.with_historical_volatility(*hv, period),
                    None => contract,
                }
            })
            .collect()
    }

    async fn benchmark_for(&self, symbol: &str) -> Option<BenchmarkSnapshot> {
        if !symbol.eq_ignore_ascii_case(&self.config.benchmark_symbol) {
            return None;
        }

        match self.benchmarks.load_latest(symbol).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%symbol, %error, "failed to load benchmark snapshot");
                None
            }
        }
    }
}

/// Keep unexpired contracts of the requested kind and tenor that carry at
/// least one side of a quote.
pub fn live_filter(chain: Vec<OptionContract>, request: &AnalysisRequest) -> Vec<OptionContract> {
    chain
        .into_iter()
        .filter(|contract| contract.days_to_expiry > 0)
        .filter(|contract| contract.kind == request.kind)
        .filter(|contract| {
            request
                .max_days
                .is_none_or(|max_days| contract.days_to_expiry <= max_days)
        })
        .filter(OptionContract::has_quote)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::contract::test_utils::call;

    #[test]
    fn test_live_filter() {
        struct TestCase {
            input: OptionContract,
            request: AnalysisRequest,
            expected: bool,
        }

        let put = {
            let mut contract = call(100.0, 30);
            contract.kind = OptionKind::Put;
            contract
        };
        let unquoted = {
            let mut contract = call(100.0, 30);
            contract.bid = 0.0;
            contract.ask = 0.0;
            contract
        };

        let tests = vec![
            TestCase {
                // TC0: plain call
                input: call(100.0, 30),
                request: AnalysisRequest::new("NVDA"),
                expected: true,
            },
            TestCase {
                // TC1: expiring today
                input: call(100.0, 0),
                request: AnalysisRequest::new("NVDA"),
                expected: false,
            },
            TestCase {
                // TC2: expired
                input: call(100.0, -5),
                request: AnalysisRequest::new("NVDA"),
                expected: false,
            },
            TestCase {
                // TC3: wrong kind
                input: put.clone(),
                request: AnalysisRequest::new("NVDA"),
                expected: false,
            },
            TestCase {
                // TC4: put requested
                input: put,
                request: AnalysisRequest::new("NVDA").with_kind(OptionKind::Put),
                expected: true,
            },
            TestCase {
                // TC5: beyond max days
                input: call(100.0, 45),
                request: AnalysisRequest::new("NVDA").with_max_days(30),
                expected: false,
            },
            TestCase {
                // TC6: max days is inclusive
                input: call(100.0, 30),
                request: AnalysisRequest::new("NVDA").with_max_days(30),
                expected: true,
            },
            TestCase {
                // TC7: no bid and no ask
                input: unquoted,
                request: AnalysisRequest::new("NVDA"),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = !live_filter(vec![test.input], &test.request).is_empty();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_analysis_request_defaults() {
        let actual = serde_json::from_str::<AnalysisRequest>(r#"{"symbol":"AAPL"}"#).unwrap();
        assert_eq!(actual.kind, OptionKind::Call);
        assert_eq!(actual.max_days, None);
        assert!(!actual.refresh);
    }
}
