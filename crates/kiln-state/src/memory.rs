use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_common::SetupState;
use tokio::sync::RwLock;

use crate::types::{StateError, StateStore};

/// Keeps the last saved snapshot in memory. Used by tests and dry runs.
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    dir: PathBuf,
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    saved: Option<SetupState>,
    saves: u64,
}

impl MemoryStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Pre-seed the store as if `state` had been saved by an earlier run.
    pub fn with_state(state: SetupState) -> Self {
        let store = Self::new(state.output_dir.clone());
        if let Ok(mut inner) = store.inner.try_write() {
            inner.saved = Some(state);
        }
        store
    }

    pub async fn save_count(&self) -> u64 {
        self.inner.read().await.saves
    }

    pub async fn snapshot(&self) -> Option<SetupState> {
        self.inner.read().await.saved.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<SetupState, StateError> {
        let inner = self.inner.read().await;
        Ok(inner
            .saved
            .clone()
            .unwrap_or_else(|| SetupState::new(&self.dir)))
    }

    async fn save(&self, state: &SetupState) -> Result<(), StateError> {
        let mut snapshot = state.clone();
        // match the file store: secrets do not survive a save
        snapshot.keys.keyring_password = None;
        let mut inner = self.inner.write().await;
        inner.saved = Some(snapshot);
        inner.saves = inner.saves.saturating_add(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_mirrors_file_contract() {
        let store = MemoryStateStore::new("/tmp/kiln");
        let fresh = store.load().await.unwrap();
        assert!(fresh.completed_phases.is_empty());

        let mut state = fresh.clone();
        state.mark_phase_complete("network");
        state.keys.keyring_password = Some("pw".into());
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(loaded.is_phase_complete("network"));
        assert!(loaded.keys.keyring_password.is_none());
        assert_eq!(store.save_count().await, 1);
    }
}
