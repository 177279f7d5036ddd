use crayon_core::{Settings, SettingsPatch};
use crayon_storage::{SettingsPersistence, StorageError};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, warn};

/// Read-through cache over the durable settings store. The cached value is
/// what the poller and the push handler read; writes land here first.
pub struct SettingsCache {
    store: Arc<dyn SettingsPersistence>,
    cached: RwLock<Option<Settings>>,
}

impl SettingsCache {
    pub fn new(store: Arc<dyn SettingsPersistence>) -> Self {
        Self {
            store,
            cached: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Settings {
        if let Some(settings) = self.cached.read().await.as_ref() {
            return settings.clone();
        }

        let mut slot = self.cached.write().await;
        if let Some(settings) = slot.as_ref() {
            return settings.clone();
        }

        match self.load().await {
            Ok(settings) => {
                *slot = Some(settings.clone());
                settings
            }
            Err(err) => {
                // Not cached, so the next read retries the store.
                warn!(event = "settings_load_failed", error = %err);
                Settings::default()
            }
        }
    }

    /// Normalizes `patch`, makes it visible immediately, then persists it. A
    /// persistence failure is logged and the cached value still applies.
    pub async fn set(&self, patch: SettingsPatch) -> Settings {
        let settings = patch.normalize();
        *self.cached.write().await = Some(settings.clone());

        let store = Arc::clone(&self.store);
        let to_save = settings.clone();
        match tokio::task::spawn_blocking(move || store.save_settings(&to_save)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(event = "settings_persist_failed", error = %err),
            Err(err) => error!(event = "settings_persist_failed", error = %err),
        }

        settings
    }

    #[cfg(test)]
    async fn is_loaded(&self) -> bool {
        self.cached.read().await.is_some()
    }

    async fn load(&self) -> Result<Settings, StorageError> {
        let store = Arc::clone(&self.store);
        let loaded = tokio::task::spawn_blocking(move || store.load_settings())
            .await
            .map_err(|err| StorageError::Serialization(format!("settings load task: {err}")))??;
        Ok(loaded.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crayon_core::{ColorTable, ColorTablePatch};
    use crayon_storage::MemorySettingsStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FlakyStore {
        inner: MemorySettingsStore,
        fail_loads: AtomicBool,
        fail_saves: AtomicBool,
        loads: AtomicUsize,
    }

    impl SettingsPersistence for FlakyStore {
        fn load_settings(&self) -> Result<Option<Settings>, StorageError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(StorageError::Serialization("disk gone".to_string()));
            }
            self.inner.load_settings()
        }

        fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(StorageError::Serialization("read-only".to_string()));
            }
            self.inner.save_settings(settings)
        }
    }

    #[tokio::test]
    async fn first_read_falls_back_to_defaults_and_caches() {
        let store = Arc::new(FlakyStore::default());
        let cache = SettingsCache::new(store.clone());

        assert_eq!(cache.get().await, Settings::default());
        assert_eq!(cache.get().await, Settings::default());
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        assert!(cache.is_loaded().await);
    }

    #[tokio::test]
    async fn failed_load_is_retried_on_next_read() {
        let store = Arc::new(FlakyStore::default());
        store.fail_loads.store(true, Ordering::SeqCst);
        let cache = SettingsCache::new(store.clone());

        assert_eq!(cache.get().await, Settings::default());
        assert!(!cache.is_loaded().await);

        store.fail_loads.store(false, Ordering::SeqCst);
        store
            .inner
            .save_settings(&Settings {
                auto_mode: false,
                colors: ColorTable::default(),
            })
            .expect("seed store");
        assert!(!cache.get().await.auto_mode);
        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn set_replaces_rather_than_merges_previous_value() {
        let store = Arc::new(FlakyStore::default());
        let cache = SettingsCache::new(store.clone());

        cache
            .set(SettingsPatch {
                auto_mode: Some(false),
                colors: Some(ColorTablePatch {
                    json: Some("#000001".to_string()),
                    xml: Some("#000002".to_string()),
                    ..ColorTablePatch::default()
                }),
            })
            .await;

        let updated = cache
            .set(SettingsPatch {
                auto_mode: None,
                colors: Some(ColorTablePatch {
                    json: Some("#000003".to_string()),
                    ..ColorTablePatch::default()
                }),
            })
            .await;

        assert!(updated.auto_mode);
        assert_eq!(updated.colors.json, "#000003");
        assert_eq!(updated.colors.xml, ColorTable::default().xml);
        assert_eq!(cache.get().await, updated);
        assert_eq!(
            store.inner.load_settings().expect("load"),
            Some(updated.clone())
        );
    }

    #[tokio::test]
    async fn persist_failure_keeps_cached_value() {
        let store = Arc::new(FlakyStore::default());
        store.fail_saves.store(true, Ordering::SeqCst);
        let cache = SettingsCache::new(store.clone());

        let saved = cache
            .set(SettingsPatch {
                auto_mode: Some(false),
                colors: None,
            })
            .await;

        assert!(!saved.auto_mode);
        assert!(!cache.get().await.auto_mode);
        assert_eq!(store.inner.load_settings().expect("load"), None);
    }
}
