use super::{BenchmarkSnapshot, RawIvSamples};
use crate::{error::AnalyticsError, persist};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use smol_str::SmolStr;
use std::path::PathBuf;
use tracing::info;

/// Whole-artifact storage for benchmark snapshots. Writes replace, never merge.
pub trait BenchmarkStore: Send + Sync {
    fn load(&self, symbol: &str) -> Result<Option<BenchmarkSnapshot>, AnalyticsError>;

    fn save(&self, snapshot: &BenchmarkSnapshot, raw: &RawIvSamples)
    -> Result<(), AnalyticsError>;
}

/// Stores artifacts as JSON documents under a directory:
/// `<symbol>-historical-benchmarks.json` and `<symbol>-raw-iv.json`.
#[derive(Debug, Clone)]
pub struct FileBenchmarkStore {
    dir: PathBuf,
}

impl FileBenchmarkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn snapshot_path(&self, symbol: &str) -> PathBuf {
        self.dir
            .join(format!("{}-historical-benchmarks.json", symbol.to_ascii_lowercase()))
    }

    pub fn raw_path(&self, symbol: &str) -> PathBuf {
        self.dir
            .join(format!("{}-raw-iv.json", symbol.to_ascii_lowercase()))
    }
}

impl BenchmarkStore for FileBenchmarkStore {
    fn load(&self, symbol: &str) -> Result<Option<BenchmarkSnapshot>, AnalyticsError> {
        persist::read_json(&self.snapshot_path(symbol))
    }

    fn save(
        &self,
        snapshot: &BenchmarkSnapshot,
        raw: &RawIvSamples,
    ) -> Result<(), AnalyticsError> {
        persist::write_json_atomic(&self.snapshot_path(&snapshot.symbol), snapshot)?;
        persist::write_json_atomic(&self.raw_path(&snapshot.symbol), raw)?;

        info!(
            symbol = %snapshot.symbol,
            path = %self.snapshot_path(&snapshot.symbol).display(),
            "benchmark snapshot persisted"
        );
        Ok(())
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryBenchmarkStore {
    snapshots: RwLock<FnvHashMap<SmolStr, (BenchmarkSnapshot, RawIvSamples)>>,
}

impl MemoryBenchmarkStore {
    pub fn raw(&self, symbol: &str) -> Option<RawIvSamples> {
        self.snapshots
            .read()
            .get(&SmolStr::new(symbol.to_ascii_uppercase()))
            .map(|(_, raw)| raw.clone())
    }
}

impl BenchmarkStore for MemoryBenchmarkStore {
    fn load(&self, symbol: &str) -> Result<Option<BenchmarkSnapshot>, AnalyticsError> {
        Ok(self
            .snapshots
            .read()
            .get(&SmolStr::new(symbol.to_ascii_uppercase()))
            .map(|(snapshot, _)| snapshot.clone()))
    }

    fn save(
        &self,
        snapshot: &BenchmarkSnapshot,
        raw: &RawIvSamples,
    ) -> Result<(), AnalyticsError> {
        self.snapshots.write().insert(
            SmolStr::new(snapshot.symbol.to_ascii_uppercase()),
            (snapshot.clone(), raw.clone()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{benchmark::BucketStats, model::DteBucket, persist::test_utils::scratch_dir};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn snapshot(data_points: usize) -> BenchmarkSnapshot {
        BenchmarkSnapshot {
            symbol: SmolStr::new_static("NVDA"),
            per_bucket: DteBucket::ALL
                .into_iter()
                .map(|bucket| (bucket, BucketStats::default()))
                .collect(),
            analysis_window_days: 126,
            data_points,
            total_samples: 0,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_file_store_replaces_snapshot() {
        let dir = scratch_dir("benchmarks");
        let store = FileBenchmarkStore::new(&dir);
        let raw = RawIvSamples {
            symbol: SmolStr::new_static("NVDA"),
            buckets: BTreeMap::from([(DteBucket::Short, vec![0.31, 0.0])]),
        };

        assert_eq!(store.load("NVDA").unwrap(), None);

        store.save(&snapshot(10), &raw).unwrap();
        store.save(&snapshot(20), &raw).unwrap();

        let loaded = store.load("NVDA").unwrap().unwrap();
        assert_eq!(loaded.data_points, 20);
        assert_eq!(loaded.per_bucket.len(), 4);
        assert!(dir.join("nvda-historical-benchmarks.json").exists());
        assert!(dir.join("nvda-raw-iv.json").exists());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_memory_store_is_case_insensitive() {
        let store = MemoryBenchmarkStore::default();
        store.save(&snapshot(5), &RawIvSamples::default()).unwrap();

        assert_eq!(store.load("nvda").unwrap().map(|s| s.data_points), Some(5));
        assert!(store.raw("NVDA").is_some());
        assert_eq!(store.load("AAPL").unwrap(), None);
    }
}
