use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::storage::{SEQUENCES_KEY, Storage};

pub const FLUSH_DEBOUNCE: Duration = Duration::from_millis(50);

/// Named monotonically increasing counters with coalesced write-back.
///
/// The map is loaded once, mutated in memory, and written back after a short
/// debounce so a burst of `next` calls costs one durable write. There is no
/// cross-process locking; concurrent writers on the same name can lose updates.
#[derive(Clone)]
pub struct SequenceCache {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn Storage>,
    debounce: Duration,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    counters: Option<BTreeMap<String, u64>>,
    dirty: bool,
    timer: Option<JoinHandle<()>>,
}

impl SequenceCache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_debounce(storage, FLUSH_DEBOUNCE)
    }

    pub fn with_debounce(storage: Arc<dyn Storage>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                debounce,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Issues the next value for `name`; the first value of a fresh name is 1.
    pub async fn next(&self, name: &str) -> u64 {
        let key = if name.is_empty() { "default" } else { name };
        let mut state = self.inner.state.lock().await;
        self.ensure_loaded(&mut state).await;
        let counters = state.counters.get_or_insert_with(BTreeMap::new);
        let counter = counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        let issued = *counter;
        state.dirty = true;
        self.schedule_flush(&mut state);
        debug!(sequence = key, value = issued, "sequence advanced");
        issued
    }

    /// Writes pending changes now, cancelling any scheduled write.
    pub async fn flush(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        self.write_back(&mut state).await;
    }

    async fn ensure_loaded(&self, state: &mut CacheState) {
        if state.counters.is_some() {
            return;
        }
        let loaded = match self.inner.storage.get(SEQUENCES_KEY).await {
            Ok(Some(Value::Object(map))) => map
                .into_iter()
                .map(|(name, v)| (name, v.as_u64().unwrap_or(0)))
                .collect(),
            Ok(_) => BTreeMap::new(),
            Err(e) => {
                warn!("failed to load sequences, starting empty: {e}");
                BTreeMap::new()
            }
        };
        state.counters = Some(loaded);
    }

    fn schedule_flush(&self, state: &mut CacheState) {
        if state.timer.is_some() {
            return;
        }
        let this = self.clone();
        let debounce = self.inner.debounce;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let mut state = this.inner.state.lock().await;
            state.timer = None;
            this.write_back(&mut state).await;
        }));
    }

    async fn write_back(&self, state: &mut CacheState) {
        if !state.dirty {
            return;
        }
        let Some(counters) = state.counters.as_ref() else {
            return;
        };
        let value = match serde_json::to_value(counters) {
            Ok(value) => value,
            Err(e) => {
                warn!("sequences not serializable: {e}");
                return;
            }
        };
        match self.inner.storage.set(SEQUENCES_KEY, value).await {
            Ok(()) => state.dirty = false,
            Err(e) => warn!("sequence flush failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    #[tokio::test]
    async fn counters_increase_per_name() {
        let cache = SequenceCache::new(Arc::new(MemoryStorage::new()));
        assert_eq!(cache.next("a").await, 1);
        assert_eq!(cache.next("a").await, 2);
        assert_eq!(cache.next("b").await, 1);
        assert_eq!(cache.next("a").await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_calls_produces_one_write() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = SequenceCache::new(storage.clone());
        for _ in 0..5 {
            cache.next("order").await;
        }
        assert_eq!(storage.write_count(), 0);

        tokio::time::sleep(FLUSH_DEBOUNCE * 2).await;
        assert_eq!(storage.write_count(), 1);
        assert_eq!(storage.snapshot(SEQUENCES_KEY), Some(json!({ "order": 5 })));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_flush_cancels_pending_timer() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = SequenceCache::new(storage.clone());
        cache.next("x").await;
        cache.flush().await;
        assert_eq!(storage.write_count(), 1);

        tokio::time::sleep(FLUSH_DEBOUNCE * 2).await;
        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test]
    async fn resumes_from_stored_values() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(SEQUENCES_KEY, json!({ "invoice": 41 })).await.unwrap();
        let cache = SequenceCache::new(storage);
        assert_eq!(cache.next("invoice").await, 42);
    }
}
