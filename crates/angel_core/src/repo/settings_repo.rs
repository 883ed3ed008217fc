//! Site settings repository.
//!
//! # Invariants
//! - Settings are a singleton mapping; a missing store reads as empty.
//! - `update_settings` is a shallow merge; unmentioned keys are kept.
//! - The JSON backend caches the mapping write-through, so reads after a
//!   write through the same cache always observe that write.

use crate::model::settings::Settings;
use crate::repo::sql_support::{begin_immediate, ensure_connection_ready};
use crate::repo::{RepoError, RepoResult};
use crate::store::{FileStore, Outcome};
use rusqlite::{params, Connection};
use std::sync::{Arc, PoisonError, RwLock};

const SETTINGS_DOCUMENT: &str = "settings";

pub trait SettingsRepository {
    fn load_settings(&self) -> RepoResult<Settings>;
    /// Replaces the whole mapping.
    fn save_settings(&self, settings: &Settings) -> RepoResult<()>;
    /// Shallow-merges `patch` and returns the merged mapping.
    fn update_settings(&self, patch: &Settings) -> RepoResult<Settings>;
}

/// Shared slot for the cached settings mapping.
pub type SettingsCache = Arc<RwLock<Option<Settings>>>;

pub struct JsonSettingsRepository {
    store: FileStore,
    cache: SettingsCache,
}

impl JsonSettingsRepository {
    pub fn new(store: FileStore) -> Self {
        Self::with_cache(store, SettingsCache::default())
    }

    /// Uses a cache shared with other repositories over the same store.
    pub fn with_cache(store: FileStore, cache: SettingsCache) -> Self {
        Self { store, cache }
    }

    fn remember(&self, settings: &Settings) {
        let mut slot = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(settings.clone());
    }
}

impl SettingsRepository for JsonSettingsRepository {
    fn load_settings(&self) -> RepoResult<Settings> {
        if let Some(cached) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(cached.clone());
        }
        let settings: Settings = self.store.read(SETTINGS_DOCUMENT)?;
        self.remember(&settings);
        Ok(settings)
    }

    fn save_settings(&self, settings: &Settings) -> RepoResult<()> {
        self.store.write(SETTINGS_DOCUMENT, settings)?;
        self.remember(settings);
        Ok(())
    }

    fn update_settings(&self, patch: &Settings) -> RepoResult<Settings> {
        let merged = self.store.update(
            SETTINGS_DOCUMENT,
            |settings: &mut Settings| -> RepoResult<Outcome<Settings>> {
                settings.merge(patch);
                Ok(Outcome::Changed(settings.clone()))
            },
        )?;
        self.remember(&merged);
        Ok(merged)
    }
}

pub struct SqliteSettingsRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSettingsRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["settings"])?;
        Ok(Self { conn })
    }
}

impl SettingsRepository for SqliteSettingsRepository<'_> {
    fn load_settings(&self) -> RepoResult<Settings> {
        load_settings_from(self.conn)
    }

    fn save_settings(&self, settings: &Settings) -> RepoResult<()> {
        let tx = begin_immediate(self.conn)?;
        tx.execute("DELETE FROM settings;", [])?;
        upsert_values(&tx, settings)?;
        tx.commit()?;
        Ok(())
    }

    fn update_settings(&self, patch: &Settings) -> RepoResult<Settings> {
        let tx = begin_immediate(self.conn)?;
        upsert_values(&tx, patch)?;
        let merged = load_settings_from(&tx)?;
        tx.commit()?;
        Ok(merged)
    }
}

fn load_settings_from(conn: &Connection) -> RepoResult<Settings> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key ASC;")?;
    let mut rows = stmt.query([])?;
    let mut settings = Settings::new();
    while let Some(row) = rows.next()? {
        let key: String = row.get(0)?;
        let raw: String = row.get(1)?;
        let value = serde_json::from_str(&raw).map_err(|_| {
            RepoError::InvalidData(format!("invalid JSON for settings key `{key}`"))
        })?;
        settings.set(key, value);
    }
    Ok(settings)
}

fn upsert_values(conn: &Connection, settings: &Settings) -> RepoResult<()> {
    for (key, value) in settings.iter() {
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
            params![key.as_str(), value.to_string()],
        )?;
    }
    Ok(())
}
