use super::{
    BenchmarkSnapshot, BenchmarkStatus, BenchmarkStore, IvAccumulator, trading_days,
};
use crate::{
    clock::Clock,
    error::AnalyticsError,
    persist,
    provider::OptionChainSource,
};
use chrono::NaiveDate;
use fnv::FnvHashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Progress event emitted by a running backfill.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackfillProgress {
    pub symbol: SmolStr,
    /// Trading days handled so far, including skipped ones
    pub current: usize,
    pub total: usize,
    pub status: BackfillStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackfillStatus {
    Started,
    Processing { date: NaiveDate },
    DayCompleted { date: NaiveDate, contracts: usize },
    DaySkipped { date: NaiveDate, reason: String },
    Persisting,
    Completed { data_points: usize, total_samples: usize },
    Cancelled,
    Failed { error: String },
}

impl BackfillStatus {
    /// Determine if no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackfillStatus::Completed { .. } | BackfillStatus::Cancelled | BackfillStatus::Failed { .. }
        )
    }
}

/// Requests cancellation of a running backfill.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Whether both handles control the same run.
    pub fn same_run(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

/// Cancellation signal observed by a backfill between days and while it
/// waits out the inter-call delay.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn channel() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `delay`, returning `true` if cancelled before it elapsed.
    async fn sleep_or_cancel(&mut self, delay: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }

        // A dropped CancelHandle disables the cancel branch, the delay still applies
        let cancelled = tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            true = async { self.rx.wait_for(|cancelled| *cancelled).await.is_ok() } => true,
        };
        cancelled || self.is_cancelled()
    }
}

/// Handle to a spawned backfill.
#[derive(Debug)]
pub struct BackfillHandle {
    pub symbol: SmolStr,
    pub progress: mpsc::UnboundedReceiver<BackfillProgress>,
    pub cancel: CancelHandle,
    pub join: JoinHandle<Result<BenchmarkSnapshot, AnalyticsError>>,
}

/// Marks a symbol as having a backfill in flight until dropped.
#[derive(Debug)]
struct RunGuard {
    symbol: SmolStr,
    running: Arc<Mutex<FnvHashSet<SmolStr>>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.lock().remove(&self.symbol);
    }
}

/// Builds [`BenchmarkSnapshot`]s by walking historical option chains one
/// trading day at a time.
pub struct BenchmarkAggregator {
    chains: Arc<dyn OptionChainSource>,
    store: Arc<dyn BenchmarkStore>,
    clock: Arc<dyn Clock>,
    call_delay: Duration,
    running: Arc<Mutex<FnvHashSet<SmolStr>>>,
}

impl std::fmt::Debug for BenchmarkAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkAggregator")
            .field("call_delay", &self.call_delay)
            .field("running", &self.running)
            .finish()
    }
}

impl BenchmarkAggregator {
    pub fn new(
        chains: Arc<dyn OptionChainSource>,
        store: Arc<dyn BenchmarkStore>,
        clock: Arc<dyn Clock>,
        call_delay: Duration,
    ) -> Self {
        Self {
            chains,
            store,
            clock,
            call_delay,
            running: Arc::new(Mutex::new(FnvHashSet::default())),
        }
    }

    pub fn is_running(&self, symbol: &str) -> bool {
        self.running.lock().contains(&normalise(symbol))
    }

    /// Latest persisted snapshot for `symbol`.
    pub async fn load_latest(
        &self,
        symbol: &str,
    ) -> Result<Option<BenchmarkSnapshot>, AnalyticsError> {
        let store = Arc::clone(&self.store);
        let symbol = normalise(symbol);
        persist::off_runtime(move || store.load(&symbol)).await
    }

    pub async fn status(&self, symbol: &str) -> Result<BenchmarkStatus, AnalyticsError> {
        let snapshot = self.load_latest(symbol).await?;
        Ok(BenchmarkStatus::from_snapshot(&normalise(symbol), snapshot.as_ref()))
    }

    /// Start a backfill for `symbol` on a background task.
    ///
    /// Fails immediately with [`AnalyticsError::BackfillInProgress`] if one is
    /// already running for the symbol.
    pub fn spawn(
        self: &Arc<Self>,
        symbol: &str,
        window_days: usize,
    ) -> Result<BackfillHandle, AnalyticsError> {
        let guard = self.acquire(symbol)?;
        let symbol = guard.symbol.clone();

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (cancel, signal) = CancelSignal::channel();

        let aggregator = Arc::clone(self);
        let join = tokio::spawn(async move {
            let guard = guard;
            aggregator
                .execute(&guard.symbol, window_days, &progress_tx, signal)
                .await
        });

        Ok(BackfillHandle {
            symbol,
            progress: progress_rx,
            cancel,
            join,
        })
    }

    /// Run a backfill for `symbol` to completion on the current task.
    pub async fn run(
        &self,
        symbol: &str,
        window_days: usize,
        progress: &mpsc::UnboundedSender<BackfillProgress>,
        cancel: CancelSignal,
    ) -> Result<BenchmarkSnapshot, AnalyticsError> {
        let guard = self.acquire(symbol)?;
        self.execute(&guard.symbol, window_days, progress, cancel).await
    }

    fn acquire(&self, symbol: &str) -> Result<RunGuard, AnalyticsError> {
        let symbol = normalise(symbol);
        if !self.running.lock().insert(symbol.clone()) {
            return Err(AnalyticsError::BackfillInProgress { symbol });
        }

        Ok(RunGuard {
            symbol,
            running: Arc::clone(&self.running),
        })
    }

    async fn execute(
        &self,
        symbol: &SmolStr,
        window_days: usize,
        progress: &mpsc::UnboundedSender<BackfillProgress>,
        mut cancel: CancelSignal,
    ) -> Result<BenchmarkSnapshot, AnalyticsError> {
        let days = trading_days(self.clock.today(), window_days);
        let total = days.len();
        let emit = |current: usize, status: BackfillStatus| {
            // Receiver may have gone away; the run continues regardless
            let _ = progress.send(BackfillProgress {
                symbol: symbol.clone(),
                current,
                total,
                status,
            });
        };

        info!(%symbol, window_days, first = ?days.first(), last = ?days.last(), "benchmark backfill started");
        emit(0, BackfillStatus::Started);

        let mut accumulator = IvAccumulator::default();
        let mut data_points = 0;

        for (index, day) in days.iter().copied().enumerate() {
            let cancelled = if index == 0 {
                cancel.is_cancelled()
            } else {
                cancel.sleep_or_cancel(self.call_delay).await
            };
            if cancelled {
                info!(%symbol, processed = index, "benchmark backfill cancelled");
                emit(index, BackfillStatus::Cancelled);
                return Err(AnalyticsError::Cancelled {
                    symbol: symbol.clone(),
                });
            }

            emit(index, BackfillStatus::Processing { date: day });

            match self.chains.option_chain(symbol, Some(day)).await {
                Ok(contracts) if contracts.is_empty() => {
                    warn!(%symbol, %day, "no option contracts, skipping day");
                    emit(
                        index + 1,
                        BackfillStatus::DaySkipped {
                            date: day,
                            reason: "no contracts".to_string(),
                        },
                    );
                }
                Ok(contracts) => {
                    for contract in &contracts {
                        accumulator.push(contract, day);
                    }
                    data_points += 1;
                    debug!(%symbol, %day, contracts = contracts.len(), "backfill day processed");
                    emit(
                        index + 1,
                        BackfillStatus::DayCompleted {
                            date: day,
                            contracts: contracts.len(),
                        },
                    );
                }
                Err(error) if data_points == 0 && !error.is_transient() => {
                    error!(%symbol, %day, %error, "permanent provider error before any data, aborting backfill");
                    emit(
                        index + 1,
                        BackfillStatus::Failed {
                            error: error.to_string(),
                        },
                    );
                    return Err(error.into());
                }
                Err(error) => {
                    warn!(%symbol, %day, %error, "failed to fetch option chain, skipping day");
                    emit(
                        index + 1,
                        BackfillStatus::DaySkipped {
                            date: day,
                            reason: error.to_string(),
                        },
                    );
                }
            }
        }

        if data_points == 0 {
            let error = AnalyticsError::NoContracts {
                symbol: symbol.clone(),
            };
            warn!(%symbol, "benchmark backfill produced no data, keeping previous snapshot");
            emit(
                total,
                BackfillStatus::Failed {
                    error: error.to_string(),
                },
            );
            return Err(error);
        }

        let snapshot = BenchmarkSnapshot {
            symbol: symbol.clone(),
            per_bucket: accumulator.stats(),
            analysis_window_days: window_days,
            data_points,
            total_samples: accumulator.total_samples(),
            last_updated: self.clock.now(),
        };

        emit(total, BackfillStatus::Persisting);
        let store = Arc::clone(&self.store);
        let (persisted, raw) = (snapshot.clone(), accumulator.raw(symbol));
        if let Err(error) = persist::off_runtime(move || store.save(&persisted, &raw)).await {
            error!(%symbol, %error, "failed to persist benchmark snapshot");
            emit(
                total,
                BackfillStatus::Failed {
                    error: error.to_string(),
                },
            );
            return Err(error);
        }

        info!(
            %symbol,
            data_points,
            total_samples = snapshot.total_samples,
            "benchmark backfill completed"
        );
        emit(
            total,
            BackfillStatus::Completed {
                data_points,
                total_samples: snapshot.total_samples,
            },
        );

        Ok(snapshot)
    }
}

fn normalise(symbol: &str) -> SmolStr {
    SmolStr::new(symbol.trim().to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        benchmark::MemoryBenchmarkStore,
        clock::ManualClock,
        error::ProviderError,
        model::{DteBucket, OptionContract, contract::test_utils::call},
    };
    use async_trait::async_trait;
    use chrono::Days;

    #[test]
    fn test_cancel_handle_identity() {
        let (first, _first_signal) = CancelSignal::channel();
        let (second, _second_signal) = CancelSignal::channel();

        assert!(first.same_run(&first.clone()));
        assert!(!first.same_run(&second));

        first.cancel();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    /// 2024-03-08 is a Friday.
    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
    }

    /// Serves a chain per day, failing on scripted days.
    struct ScriptedChains {
        failures: Vec<(NaiveDate, ProviderError)>,
        empty: Vec<NaiveDate>,
        calls: Mutex<Vec<NaiveDate>>,
    }

    impl ScriptedChains {
        fn new() -> Self {
            Self {
                failures: Vec::new(),
                empty: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OptionChainSource for ScriptedChains {
        async fn option_chain(
            &self,
            _symbol: &str,
            as_of: Option<NaiveDate>,
        ) -> Result<Vec<OptionContract>, ProviderError> {
            let as_of = as_of.unwrap_or_else(today);
            self.calls.lock().push(as_of);

            if let Some((_, error)) = self.failures.iter().find(|(day, _)| *day == as_of) {
                return Err(error.clone());
            }
            if self.empty.contains(&as_of) {
                return Ok(Vec::new());
            }

            // one short dated contract that expired on 2024-03-01
            let mut expired = call(100.0, 0);
            expired.expiration = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
            expired.as_of = as_of;
            expired.implied_volatility = 0.40;
            expired.volume = 1;

            let mut long = call(120.0, 0);
            long.expiration = as_of + Days::new(365);
            long.as_of = as_of;
            long.implied_volatility = 0.0;

            Ok(vec![expired, long])
        }
    }

    fn aggregator(chains: ScriptedChains) -> (Arc<BenchmarkAggregator>, Arc<MemoryBenchmarkStore>) {
        let store = Arc::new(MemoryBenchmarkStore::default());
        let aggregator = Arc::new(BenchmarkAggregator::new(
            Arc::new(chains),
            store.clone(),
            Arc::new(ManualClock::on(today())),
            Duration::from_millis(1),
        ));
        (aggregator, store)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<BackfillProgress>) -> Vec<BackfillStatus> {
        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            statuses.push(event.status);
        }
        statuses
    }

    #[tokio::test]
    async fn test_backfill_skips_failed_days_and_persists() {
        let mut chains = ScriptedChains::new();
        chains.failures.push((
            NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
            ProviderError::Timeout,
        ));
        chains.empty.push(NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
        let (aggregator, store) = aggregator(chains);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_cancel, signal) = CancelSignal::channel();
        let snapshot = aggregator.run("nvda", 5, &tx, signal).await.unwrap();

        assert_eq!(snapshot.symbol, "NVDA");
        assert_eq!(snapshot.data_points, 3);
        assert_eq!(snapshot.total_samples, 6);
        assert_eq!(snapshot.analysis_window_days, 5);

        // expired contracts are still bucketed by tenor
        let ultra_short = snapshot.per_bucket[&DteBucket::UltraShort];
        assert_eq!(ultra_short.sample_count, 3);
        assert!((ultra_short.average_iv - 0.40).abs() < 1e-12);

        let long = snapshot.per_bucket[&DteBucket::Long];
        assert_eq!(long.sample_count, 3);
        assert_eq!(long.valid_iv_count, 0);

        assert_eq!(store.load("NVDA").unwrap(), Some(snapshot));

        let statuses = drain(&mut rx);
        assert_eq!(statuses.first(), Some(&BackfillStatus::Started));
        assert!(statuses.iter().any(|status| matches!(
            status,
            BackfillStatus::DaySkipped { reason, .. } if reason == "request timed out"
        )));
        assert!(statuses.last().is_some_and(|status| matches!(
            status,
            BackfillStatus::Completed { data_points: 3, total_samples: 6 }
        )));
    }

    #[tokio::test]
    async fn test_backfill_aborts_on_permanent_error_before_data() {
        let mut chains = ScriptedChains::new();
        // first day of a 3 day window ending Friday 2024-03-08
        chains.failures.push((
            NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
            ProviderError::Unavailable("demo key".to_string()),
        ));
        let (aggregator, store) = aggregator(chains);

        let (tx, _rx) = mpsc::unbounded_channel();
        let (_cancel, signal) = CancelSignal::channel();
        let actual = aggregator.run("NVDA", 3, &tx, signal).await;

        assert_eq!(
            actual,
            Err(AnalyticsError::Provider(ProviderError::Unavailable(
                "demo key".to_string()
            )))
        );
        assert_eq!(store.load("NVDA").unwrap(), None);
        assert!(!aggregator.is_running("NVDA"));
    }

    #[tokio::test]
    async fn test_backfill_permanent_error_after_data_is_skipped() {
        let mut chains = ScriptedChains::new();
        chains.failures.push((
            NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
            ProviderError::Api("Invalid API call".to_string()),
        ));
        let (aggregator, _store) = aggregator(chains);

        let (tx, _rx) = mpsc::unbounded_channel();
        let (_cancel, signal) = CancelSignal::channel();
        let snapshot = aggregator.run("NVDA", 3, &tx, signal).await.unwrap();

        assert_eq!(snapshot.data_points, 2);
    }

    #[tokio::test]
    async fn test_backfill_cancelled_persists_nothing() {
        let (aggregator, store) = aggregator(ScriptedChains::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (cancel, signal) = CancelSignal::channel();
        cancel.cancel();

        let actual = aggregator.run("NVDA", 10, &tx, signal).await;

        assert_eq!(
            actual,
            Err(AnalyticsError::Cancelled {
                symbol: SmolStr::new_static("NVDA")
            })
        );
        assert_eq!(store.load("NVDA").unwrap(), None);
        assert_eq!(drain(&mut rx).last(), Some(&BackfillStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_spawn_rejects_concurrent_run_for_same_symbol() {
        let store = Arc::new(MemoryBenchmarkStore::default());
        let aggregator = Arc::new(BenchmarkAggregator::new(
            Arc::new(ScriptedChains::new()),
            store,
            Arc::new(ManualClock::on(today())),
            Duration::from_secs(60),
        ));

        let handle = aggregator.spawn("NVDA", 5).unwrap();
        assert!(aggregator.is_running("nvda"));
        assert!(matches!(
            aggregator.spawn("NVDA", 5),
            Err(AnalyticsError::BackfillInProgress { .. })
        ));
        // other symbols are unaffected
        let other = aggregator.spawn("AAPL", 1).unwrap();

        handle.cancel.cancel();
        let actual = handle.join.await.unwrap();
        assert!(matches!(actual, Err(AnalyticsError::Cancelled { .. })));
        assert!(!aggregator.is_running("NVDA"));

        assert!(other.join.await.unwrap().is_ok());
    }

    #[test]
    fn test_backfill_status_is_terminal() {
        struct TestCase {
            input: BackfillStatus,
            expected: bool,
        }

        let tests = vec![
            TestCase { input: BackfillStatus::Started, expected: false },
            TestCase { input: BackfillStatus::Persisting, expected: false },
            TestCase { input: BackfillStatus::Cancelled, expected: true },
            TestCase {
                input: BackfillStatus::Failed { error: "timeout".to_string() },
                expected: true,
            },
            TestCase {
                input: BackfillStatus::Completed { data_points: 1, total_samples: 2 },
                expected: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(test.input.is_terminal(), test.expected, "TC{} failed", index);
        }
    }
}
