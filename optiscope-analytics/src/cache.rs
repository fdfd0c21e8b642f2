//! Date-scoped key/value cache.
//!
//! Entries are valid for exactly one calendar day: an entry stamped on any
//! date other than [`Clock::today`] reads as absent. Each namespace is
//! persisted as a single JSON document that is rewritten on every mutation.

use crate::{clock::Clock, error::AnalyticsError, persist};
use chrono::{DateTime, NaiveDate, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use smol_str::SmolStr;
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, warn};

/// Latest quote per symbol.
pub const PRICE_NAMESPACE: &str = "price";

/// Historical volatility keyed by `<symbol>_<period>`.
pub const HV_NAMESPACE: &str = "hv";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheEntry {
    pub payload: serde_json::Value,
    pub cached_date: NaiveDate,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
struct NamespaceDocument {
    date: Option<NaiveDate>,
    last_updated: Option<DateTime<Utc>>,
    entries: FnvHashMap<String, CacheEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheStats {
    pub namespace: SmolStr,
    pub date: Option<NaiveDate>,
    pub is_current: bool,
    pub count: usize,
}

/// Per-namespace state; holding its lock serialises every read-modify-write.
#[derive(Debug, Default)]
struct Namespace {
    loaded: bool,
    document: NamespaceDocument,
}

pub struct DailyCache {
    dir: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    namespaces: Mutex<FnvHashMap<SmolStr, Arc<Mutex<Namespace>>>>,
}

impl std::fmt::Debug for DailyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DailyCache").field("dir", &self.dir).finish()
    }
}

impl DailyCache {
    /// Cache persisted under `dir`.
    pub fn persistent(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: Some(dir.into()),
            clock,
            namespaces: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Cache that never touches the filesystem.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: None,
            clock,
            namespaces: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Fetch the payload stored under `(namespace, key)` if it was cached today.
    pub fn get<T>(&self, namespace: &str, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let today = self.clock.today();
        let handle = self.namespace(namespace);
        let mut state = handle.lock();
        self.ensure_loaded(namespace, &mut state);

        let entry = state.document.entries.get(key)?;
        if !is_current(entry, today) {
            debug!(%namespace, %key, cached_date = %entry.cached_date, "cache entry stale");
            return None;
        }

        match serde_json::from_value(entry.payload.clone()) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(%namespace, %key, ?error, "cache entry has unexpected shape");
                None
            }
        }
    }

    /// Store `payload` under `(namespace, key)` stamped with today's date.
    ///
    /// Returns once the namespace document has been durably written.
    pub fn set<T>(&self, namespace: &str, key: &str, payload: &T) -> Result<(), AnalyticsError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        let now = self.clock.now();
        let today = self.clock.today();

        let handle = self.namespace(namespace);
        let mut state = handle.lock();
        self.ensure_loaded(namespace, &mut state);

        let document = &mut state.document;
        document.entries.retain(|_, entry| is_current(entry, today));
        document.entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                cached_date: today,
                cached_at: now,
            },
        );
        document.date = Some(today);
        document.last_updated = Some(now);

        self.flush(namespace, document)
    }

    /// Drop every entry in `namespace`.
    pub fn clear(&self, namespace: &str) -> Result<(), AnalyticsError> {
        let handle = self.namespace(namespace);
        let mut state = handle.lock();
        state.loaded = true;
        state.document = NamespaceDocument::default();

        match self.path(namespace) {
            Some(path) => persist::remove_file(&path),
            None => Ok(()),
        }
    }

    pub fn stats(&self, namespace: &str) -> CacheStats {
        let today = self.clock.today();
        let handle = self.namespace(namespace);
        let mut state = handle.lock();
        self.ensure_loaded(namespace, &mut state);

        let document = &state.document;
        CacheStats {
            namespace: SmolStr::new(namespace),
            date: document.date,
            is_current: document.date == Some(today),
            count: document
                .entries
                .values()
                .filter(|entry| is_current(entry, today))
                .count(),
        }
    }

    fn namespace(&self, namespace: &str) -> Arc<Mutex<Namespace>> {
        self.namespaces
            .lock()
            .entry(SmolStr::new(namespace))
            .or_default()
            .clone()
    }

    fn ensure_loaded(&self, namespace: &str, state: &mut Namespace) {
        if state.loaded {
            return;
        }
        state.loaded = true;

        let Some(path) = self.path(namespace) else {
            return;
        };

        match persist::read_json::<NamespaceDocument>(&path) {
            Ok(Some(document)) => {
                debug!(%namespace, entries = document.entries.len(), "loaded cache namespace");
                state.document = document;
            }
            Ok(None) => {}
            Err(error) => {
                warn!(%namespace, ?error, "discarding unreadable cache file");
            }
        }
    }

    fn flush(&self, namespace: &str, document: &NamespaceDocument) -> Result<(), AnalyticsError> {
        match self.path(namespace) {
            Some(path) => persist::write_json_atomic(&path, document),
            None => Ok(()),
        }
    }

    fn path(&self, namespace: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{namespace}-cache.json")))
    }
}

/// Calendar-day validity check for a cache entry.
pub fn is_current(entry: &CacheEntry, today: NaiveDate) -> bool {
    entry.cached_date == today
}

/// Key used in [`HV_NAMESPACE`].
pub fn hv_key(symbol: &str, period: u32) -> String {
    format!("{symbol}_{period}")
}
