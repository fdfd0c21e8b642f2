use fnv::FnvHashMap;
use optiscope_analytics::benchmark::CancelHandle;
use parking_lot::Mutex;
use smol_str::SmolStr;

/// Cancel handles of the backfills started through this server, by symbol.
#[derive(Debug, Default)]
pub struct BackfillRegistry {
    running: Mutex<FnvHashMap<SmolStr, CancelHandle>>,
}

impl BackfillRegistry {
    pub fn insert(&self, symbol: SmolStr, cancel: CancelHandle) {
        self.running.lock().insert(symbol, cancel);
    }

    pub fn get(&self, symbol: &str) -> Option<CancelHandle> {
        self.running.lock().get(symbol).cloned()
    }

    /// Forget `symbol` if its entry still belongs to the run behind `cancel`.
    /// A newer run for the same symbol stays registered.
    pub fn release(&self, symbol: &str, cancel: &CancelHandle) -> bool {
        let mut running = self.running.lock();
        match running.get(symbol) {
            Some(current) if current.same_run(cancel) => {
                running.remove(symbol);
                true
            }
            _ => false,
        }
    }

    /// Remove every entry, returning them for cancellation.
    pub fn drain(&self) -> Vec<(SmolStr, CancelHandle)> {
        self.running.lock().drain().collect()
    }
}
