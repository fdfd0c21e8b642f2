//! Historical implied volatility benchmarks by tenor bucket.
//!
//! A backfill walks a window of trading days, pulls the option chain as it
//! stood on each day and folds every contract's IV into the [`DteBucket`] of
//! its tenor on that day. The resulting [`BenchmarkSnapshot`] is the only
//! durable state in the pipeline and is always replaced whole.

use crate::{
    model::{DteBucket, OptionContract},
    volatility::as_decimal,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Snapshot persistence.
pub mod store;

/// Cancellable multi-day backfill.
pub mod task;

pub use store::{BenchmarkStore, FileBenchmarkStore, MemoryBenchmarkStore};
pub use task::{
    BackfillHandle, BackfillProgress, BackfillStatus, BenchmarkAggregator, CancelHandle,
    CancelSignal,
};

#[derive(Debug, Copy, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BucketStats {
    /// Volume-weighted mean IV in the provider's decimal form
    pub average_iv: f64,
    pub sample_count: usize,
    /// Samples with a quoted (positive) IV
    pub valid_iv_count: usize,
    pub min_iv: f64,
    pub max_iv: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BenchmarkSnapshot {
    pub symbol: SmolStr,
    pub per_bucket: BTreeMap<DteBucket, BucketStats>,
    pub analysis_window_days: usize,
    /// Trading days that contributed at least one contract
    pub data_points: usize,
    pub total_samples: usize,
    pub last_updated: DateTime<Utc>,
}

impl BenchmarkSnapshot {
    pub fn bucket(&self, bucket: DteBucket) -> Option<&BucketStats> {
        self.per_bucket.get(&bucket)
    }
}

/// Raw per-bucket IV samples kept alongside a snapshot for auditing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawIvSamples {
    pub symbol: SmolStr,
    pub buckets: BTreeMap<DteBucket, Vec<f64>>,
}

/// Summary of the stored snapshot for a symbol.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BenchmarkStatus {
    pub symbol: SmolStr,
    pub has_data: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub data_points: Option<usize>,
    pub analysis_window_days: Option<usize>,
}

impl BenchmarkStatus {
    pub fn from_snapshot(symbol: &str, snapshot: Option<&BenchmarkSnapshot>) -> Self {
        Self {
            symbol: SmolStr::new(symbol),
            has_data: snapshot.is_some(),
            last_updated: snapshot.map(|snapshot| snapshot.last_updated),
            data_points: snapshot.map(|snapshot| snapshot.data_points),
            analysis_window_days: snapshot.map(|snapshot| snapshot.analysis_window_days),
        }
    }
}

/// How a live contract's IV compares with the stored benchmark for its tenor.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct BenchmarkDeviation {
    pub bucket: DteBucket,
    pub benchmark_iv: f64,
    pub current_iv: f64,
    pub deviation_percent: f64,
}

impl BenchmarkDeviation {
    /// `None` for non-positive DTE, missing buckets or unusable IVs.
    pub fn compute(snapshot: &BenchmarkSnapshot, contract: &OptionContract) -> Option<Self> {
        let bucket = DteBucket::from_live_dte(contract.days_to_expiry)?;
        let benchmark_iv = as_decimal(snapshot.bucket(bucket)?.average_iv);
        let current_iv = as_decimal(contract.implied_volatility);
        if benchmark_iv <= 0.0 || current_iv <= 0.0 {
            return None;
        }

        Some(Self {
            bucket,
            benchmark_iv,
            current_iv,
            deviation_percent: (current_iv - benchmark_iv) / benchmark_iv * 100.0,
        })
    }
}

/// The most recent `count` weekdays up to and including `end`, oldest first.
///
/// Market holidays are not excluded.
pub fn trading_days(end: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut days = std::iter::successors(Some(end), |day| day.pred_opt())
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
        .take(count)
        .collect::<Vec<_>>();
    days.reverse();
    days
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct WeightedIv {
    iv: f64,
    weight: f64,
}

/// Folds contract IVs into per-bucket volume-weighted statistics.
#[derive(Debug, Clone, Default)]
pub struct IvAccumulator {
    samples: BTreeMap<DteBucket, Vec<WeightedIv>>,
}

impl IvAccumulator {
    /// Record a contract's IV as seen on `as_of`.
    ///
    /// Unquoted (zero) IVs are kept; DTE is recomputed against `as_of` and
    /// bucketed by magnitude so expired contracts keep their tenor.
    pub fn push(&mut self, contract: &OptionContract, as_of: NaiveDate) -> DteBucket {
        let dte = OptionContract::days_between(as_of, contract.expiration);
        let bucket = DteBucket::from_historical_dte(dte);
        let iv = if contract.implied_volatility.is_finite() {
            contract.implied_volatility
        } else {
            0.0
        };

        self.samples.entry(bucket).or_default().push(WeightedIv {
            iv,
            weight: contract.volume.max(1) as f64,
        });
        bucket
    }

    pub fn total_samples(&self) -> usize {
        self.samples.values().map(Vec::len).sum()
    }

    /// Statistics for every bucket; empty buckets report zeros.
    pub fn stats(&self) -> BTreeMap<DteBucket, BucketStats> {
        DteBucket::ALL
            .into_iter()
            .map(|bucket| {
                let stats = self
                    .samples
                    .get(&bucket)
                    .map(|samples| bucket_stats(samples))
                    .unwrap_or_default();
                (bucket, stats)
            })
            .collect()
    }

    pub fn raw(&self, symbol: &str) -> RawIvSamples {
        RawIvSamples {
            symbol: SmolStr::new(symbol),
            buckets: self
                .samples
                .iter()
                .map(|(bucket, samples)| (*bucket, samples.iter().map(|s| s.iv).collect()))
                .collect(),
        }
    }
}

fn bucket_stats(samples: &[WeightedIv]) -> BucketStats {
    if samples.is_empty() {
        return BucketStats::default();
    }

    let (weighted_sum, weight_sum) = samples
        .iter()
        .fold((0.0, 0.0), |(iv_sum, w_sum), s| (iv_sum + s.iv * s.weight, w_sum + s.weight));

    BucketStats {
        average_iv: weighted_sum / weight_sum,
        sample_count: samples.len(),
        valid_iv_count: samples.iter().filter(|s| s.iv > 0.0).count(),
        min_iv: samples.iter().map(|s| s.iv).fold(f64::INFINITY, f64::min),
        max_iv: samples.iter().map(|s| s.iv).fold(f64::NEG_INFINITY, f64::max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::contract::test_utils::call;
    use chrono::Days;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_trading_days_skip_weekends() {
        // 2024-03-11 is a Monday
        let actual = trading_days(date(2024, 3, 11), 3);
        assert_eq!(actual, vec![date(2024, 3, 7), date(2024, 3, 8), date(2024, 3, 11)]);

        // ending on a Sunday starts from the preceding Friday
        let actual = trading_days(date(2024, 3, 10), 1);
        assert_eq!(actual, vec![date(2024, 3, 8)]);

        assert_eq!(trading_days(date(2024, 3, 11), 126).len(), 126);
        assert!(trading_days(date(2024, 3, 11), 0).is_empty());
    }

    #[test]
    fn test_expired_contract_bucketed_by_tenor() {
        let as_of = date(2024, 3, 18);
        let mut contract = call(100.0, 0);
        contract.expiration = as_of - Days::new(10);

        let mut accumulator = IvAccumulator::default();
        let bucket = accumulator.push(&contract, as_of);

        assert_eq!(bucket, DteBucket::UltraShort);
        assert_eq!(accumulator.total_samples(), 1);
    }

    #[test]
    fn test_bucket_stats_volume_weighted() {
        let as_of = date(2024, 3, 8);
        let mut accumulator = IvAccumulator::default();

        let mut heavy = call(100.0, 10);
        heavy.implied_volatility = 0.40;
        heavy.volume = 3;
        let mut light = call(105.0, 10);
        light.implied_volatility = 0.20;
        light.volume = 1;
        let mut unquoted = call(110.0, 10);
        unquoted.implied_volatility = 0.0;
        unquoted.volume = 0;

        for contract in [&heavy, &light, &unquoted] {
            accumulator.push(contract, as_of);
        }

        let stats = accumulator.stats();
        let ultra_short = stats[&DteBucket::UltraShort];

        // (0.40*3 + 0.20*1 + 0*1) / 5
        assert!((ultra_short.average_iv - 0.28).abs() < 1e-12);
        assert_eq!(ultra_short.sample_count, 3);
        assert_eq!(ultra_short.valid_iv_count, 2);
        assert_eq!(ultra_short.min_iv, 0.0);
        assert_eq!(ultra_short.max_iv, 0.40);

        assert_eq!(stats[&DteBucket::Long], BucketStats::default());
        assert_eq!(stats.len(), 4);

        let raw = accumulator.raw("NVDA");
        assert_eq!(raw.buckets[&DteBucket::UltraShort], vec![0.40, 0.20, 0.0]);
    }

    #[test]
    fn test_benchmark_deviation() {
        let mut per_bucket = BTreeMap::new();
        per_bucket.insert(
            DteBucket::Short,
            BucketStats {
                average_iv: 0.40,
                ..Default::default()
            },
        );
        let snapshot = BenchmarkSnapshot {
            symbol: SmolStr::new_static("NVDA"),
            per_bucket,
            analysis_window_days: 126,
            data_points: 100,
            total_samples: 1_000,
            last_updated: Utc::now(),
        };

        let mut contract = call(100.0, 30);
        contract.implied_volatility = 0.50;

        let actual = BenchmarkDeviation::compute(&snapshot, &contract).unwrap();
        assert_eq!(actual.bucket, DteBucket::Short);
        assert!((actual.deviation_percent - 25.0).abs() < 1e-9);

        // no benchmark for the medium bucket
        let contract = call(100.0, 90);
        assert_eq!(BenchmarkDeviation::compute(&snapshot, &contract), None);
    }
}
