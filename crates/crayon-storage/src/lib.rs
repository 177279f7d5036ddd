use chrono::{DateTime, Utc};
use crayon_core::{Settings, SettingsPatch};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub const SETTINGS_SCHEMA_VERSION: i64 = 1;
pub const SETTINGS_KEY: &str = "settings";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable home for the user's colorizer settings.
pub trait SettingsPersistence: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load_settings(&self) -> Result<Option<Settings>, StorageError>;
    fn save_settings(&self, settings: &Settings) -> Result<(), StorageError>;
}

pub struct SettingsStore {
    conn: Mutex<Connection>,
}

impl SettingsStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn()?
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > SETTINGS_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: SETTINGS_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let conn = self.conn()?;
            conn.execute_batch(include_str!("../migrations/0001_settings_schema.sql"))?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        Ok(())
    }

    pub fn put_value(
        &self,
        key: &str,
        value_json: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.conn()?.execute(
            "
            INSERT INTO plugin_settings (key, value_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value_json=excluded.value_json,
                updated_at=excluded.updated_at
            ",
            params![key, value_json, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value_json = self
            .conn()?
            .query_row(
                "SELECT value_json FROM plugin_settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value_json)
    }
}

impl SettingsPersistence for SettingsStore {
    fn load_settings(&self) -> Result<Option<Settings>, StorageError> {
        let Some(value_json) = self.get_value(SETTINGS_KEY)? else {
            return Ok(None);
        };
        // Rows written by older builds may lack newer slots; normalizing back-fills them.
        let patch: SettingsPatch = serde_json::from_str(&value_json)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(Some(patch.normalize()))
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        let value_json = serde_json::to_string(settings)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.put_value(SETTINGS_KEY, &value_json, Utc::now())
    }
}

/// Process-local store for hosts without a writable data directory.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    slot: Mutex<Option<Settings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            slot: Mutex::new(Some(settings)),
        }
    }
}

impl SettingsPersistence for MemorySettingsStore {
    fn load_settings(&self) -> Result<Option<Settings>, StorageError> {
        let slot = self.slot.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(slot.clone())
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        let mut slot = self.slot.lock().map_err(|_| StorageError::Poisoned)?;
        *slot = Some(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crayon_core::ColorTable;
    use tempfile::NamedTempFile;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    fn table_exists(store: &SettingsStore, table_name: &str) -> bool {
        let count: i64 = store
            .conn()
            .expect("conn")
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table_name],
                |row| row.get(0),
            )
            .expect("table check");
        count > 0
    }

    fn updated_at(store: &SettingsStore, key: &str) -> DateTime<Utc> {
        let raw: String = store
            .conn()
            .expect("conn")
            .query_row(
                "SELECT updated_at FROM plugin_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .expect("row exists");
        DateTime::parse_from_rfc3339(&raw)
            .expect("rfc3339")
            .with_timezone(&Utc)
    }

    fn custom_settings() -> Settings {
        Settings {
            auto_mode: false,
            colors: ColorTable {
                json: "#111111".to_string(),
                ..ColorTable::default()
            },
        }
    }

    #[test]
    fn migration_creates_settings_table() {
        let store = SettingsStore::open_in_memory().expect("open db");
        assert!(table_exists(&store, "plugin_settings"));
        assert_eq!(
            store.schema_version().expect("schema version"),
            SETTINGS_SCHEMA_VERSION
        );
        store.migrate().expect("migrate is idempotent");
    }

    #[test]
    fn empty_store_has_no_settings() {
        let store = SettingsStore::open_in_memory().expect("open db");
        assert_eq!(store.load_settings().expect("load"), None);
    }

    #[test]
    fn put_value_overwrites_and_tracks_update_time() {
        let store = SettingsStore::open_in_memory().expect("open db");
        store.put_value("k", "1", ts()).expect("first put");
        store
            .put_value("k", "2", ts() + chrono::Duration::seconds(5))
            .expect("second put");

        assert_eq!(store.get_value("k").expect("get").as_deref(), Some("2"));
        assert_eq!(updated_at(&store, "k"), ts() + chrono::Duration::seconds(5));
        assert_eq!(store.get_value("missing").expect("get"), None);
    }

    #[test]
    fn saved_settings_survive_reopen() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let store = SettingsStore::open(file.path()).expect("open");
            store.save_settings(&custom_settings()).expect("save");
        }

        let reopened = SettingsStore::open(file.path()).expect("reopen");
        assert_eq!(
            reopened.load_settings().expect("load"),
            Some(custom_settings())
        );
    }

    #[test]
    fn legacy_rows_are_backfilled_with_defaults() {
        let store = SettingsStore::open_in_memory().expect("open db");
        store
            .put_value(SETTINGS_KEY, r##"{"colors":{"xml":"#222222"}}"##, ts())
            .expect("put legacy row");

        let loaded = store.load_settings().expect("load").expect("row exists");
        assert!(loaded.auto_mode);
        assert_eq!(loaded.colors.xml, "#222222");
        assert_eq!(loaded.colors.json, ColorTable::default().json);
    }

    #[test]
    fn corrupt_rows_surface_serialization_errors() {
        let store = SettingsStore::open_in_memory().expect("open db");
        store
            .put_value(SETTINGS_KEY, "not json", ts())
            .expect("put corrupt row");
        assert!(matches!(
            store.load_settings(),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn newer_schema_is_refused() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let conn = Connection::open(file.path()).expect("raw open");
            conn.execute("PRAGMA user_version = 9", []).expect("bump version");
        }
        assert!(matches!(
            SettingsStore::open(file.path()),
            Err(StorageError::UnsupportedSchemaVersion {
                found: 9,
                supported: SETTINGS_SCHEMA_VERSION
            })
        ));
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemorySettingsStore::new();
        assert_eq!(store.load_settings().expect("load"), None);
        store.save_settings(&custom_settings()).expect("save");
        assert_eq!(
            store.load_settings().expect("load"),
            Some(custom_settings())
        );
        let seeded = MemorySettingsStore::with_settings(Settings::default());
        assert_eq!(
            seeded.load_settings().expect("load"),
            Some(Settings::default())
        );
    }
}
