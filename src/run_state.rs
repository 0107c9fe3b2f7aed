use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{RunnerError, StorageError};
use crate::storage::{RUN_STATE_KEY, Storage};
use crate::types::RunState;

/// Session-scoped persistence of the run checkpoint.
///
/// Every write is mirrored in memory and every call tries the durable medium
/// first. While the medium fails the store is degraded and serves the mirror,
/// so a run keeps going with in-context resume only. The first call that
/// reaches the medium again writes the mirror back.
pub struct RunStateStore {
    storage: Arc<dyn Storage>,
    mirror: Mutex<Mirror>,
}

#[derive(Default)]
struct Mirror {
    state: Option<RunState>,
    /// The mirror holds writes the medium has not seen.
    degraded: bool,
}

impl RunStateStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            mirror: Mutex::new(Mirror::default()),
        }
    }

    pub async fn load(&self) -> Option<RunState> {
        if self.is_degraded() {
            let state = self.mirrored();
            let _ = self.write_back(state.as_ref()).await;
            return state;
        }
        match self.storage.get(RUN_STATE_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<RunState>(value) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("discarding unreadable run state: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("run state unavailable, using in-memory copy: {e}");
                self.mirrored()
            }
        }
    }

    pub async fn save(&self, state: &RunState) {
        debug!(step_index = state.step_index, total = state.total(), "checkpoint");
        self.with_mirror(|m| m.state = Some(state.clone()));
        let _ = self.write_back(Some(state)).await;
    }

    pub async fn clear(&self) {
        if let Err(e) = self.try_clear().await {
            warn!("run state remove failed: {e}");
        }
    }

    /// Like [`clear`](Self::clear), but reports a medium that refused the
    /// removal. The in-memory copy is dropped either way.
    pub async fn try_clear(&self) -> Result<(), RunnerError> {
        self.with_mirror(|m| m.state = None);
        self.write_back(None).await.map_err(RunnerError::from)
    }

    pub fn is_degraded(&self) -> bool {
        self.mirror.lock().map(|m| m.degraded).unwrap_or(true)
    }

    /// Makes the medium match `state`, tracking whether it did.
    async fn write_back(&self, state: Option<&RunState>) -> Result<(), StorageError> {
        let written = match state {
            Some(state) => match serde_json::to_value(state) {
                Ok(value) => self.storage.set(RUN_STATE_KEY, value).await,
                Err(e) => Err(e.into()),
            },
            None => self.storage.remove(RUN_STATE_KEY).await,
        };
        match &written {
            Ok(()) => {
                if self.is_degraded() {
                    info!("run state medium is back");
                }
                self.with_mirror(|m| m.degraded = false);
            }
            Err(e) => {
                if !self.is_degraded() {
                    warn!("run state write failed, continuing in memory: {e}");
                }
                self.with_mirror(|m| m.degraded = true);
            }
        }
        written
    }

    fn mirrored(&self) -> Option<RunState> {
        self.mirror.lock().ok().and_then(|m| m.state.clone())
    }

    fn with_mirror(&self, f: impl FnOnce(&mut Mirror)) {
        if let Ok(mut mirror) = self.mirror.lock() {
            f(&mut mirror);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::{Macro, Step};

    fn state(index: usize) -> RunState {
        let m = Macro {
            name: "demo".into(),
            steps: vec![Step::Wait { ms: 1 }, Step::Wait { ms: 2 }],
            ..Default::default()
        };
        RunState::new(m, index)
    }

    #[tokio::test]
    async fn survives_a_new_store_on_the_same_medium() {
        let storage = Arc::new(MemoryStorage::new());
        let store = RunStateStore::new(storage.clone());
        store.save(&state(1)).await;

        let reborn = RunStateStore::new(storage.clone());
        assert_eq!(reborn.load().await, Some(state(1)));

        reborn.clear().await;
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn degrades_to_memory_when_medium_fails() {
        let storage = Arc::new(MemoryStorage::new());
        let store = RunStateStore::new(storage.clone());
        store.save(&state(0)).await;

        storage.set_available(false);
        store.save(&state(2)).await;
        assert!(store.is_degraded());
        assert_eq!(store.load().await, Some(state(2)));

        store.clear().await;
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn writes_reach_the_medium_again_after_an_outage() {
        let storage = Arc::new(MemoryStorage::new());
        let store = RunStateStore::new(storage.clone());
        store.save(&state(0)).await;

        storage.set_available(false);
        store.save(&state(1)).await;
        assert!(store.is_degraded());

        storage.set_available(true);
        store.save(&state(2)).await;
        assert!(!store.is_degraded());

        let reborn = RunStateStore::new(storage.clone());
        assert_eq!(reborn.load().await, Some(state(2)));
    }

    #[tokio::test]
    async fn load_writes_back_a_checkpoint_taken_during_an_outage() {
        let storage = Arc::new(MemoryStorage::new());
        let store = RunStateStore::new(storage.clone());
        store.save(&state(0)).await;

        storage.set_available(false);
        store.save(&state(1)).await;
        storage.set_available(true);

        assert_eq!(store.load().await, Some(state(1)));
        assert!(!store.is_degraded());
        let reborn = RunStateStore::new(storage.clone());
        assert_eq!(reborn.load().await, Some(state(1)));
    }

    #[tokio::test]
    async fn try_clear_reports_an_unavailable_medium() {
        let storage = Arc::new(MemoryStorage::new());
        let store = RunStateStore::new(storage.clone());
        store.save(&state(1)).await;

        storage.set_available(false);
        let err = store.try_clear().await.unwrap_err();
        assert!(matches!(err, RunnerError::StorageUnavailable(_)));
        assert_eq!(store.load().await, None);

        storage.set_available(true);
        store.try_clear().await.unwrap();
        assert!(storage.snapshot(RUN_STATE_KEY).is_none());
    }
}
