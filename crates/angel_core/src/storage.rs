//! Backend factory.
//!
//! # Responsibility
//! - Open the storage backend chosen by configuration, once.
//! - Hand out backend-agnostic repository bundles.
//!
//! # Invariants
//! - The backend of a `Storage` never changes after `open`.
//! - Every bundle from one `Storage` shares the same settings cache.

use crate::config::{StorageBackend, StorageConfig};
use crate::db::{open_db, open_db_in_memory};
use crate::repo::ad_repo::{AdRepository, JsonAdRepository, SqliteAdRepository};
use crate::repo::category_repo::{
    CategoryRepository, JsonCategoryRepository, SqliteCategoryRepository,
};
use crate::repo::newsletter_repo::{
    JsonNewsletterRepository, NewsletterRepository, SqliteNewsletterRepository,
};
use crate::repo::order_repo::{JsonOrderRepository, OrderRepository, SqliteOrderRepository};
use crate::repo::product_repo::{
    JsonProductRepository, ProductRepository, SqliteProductRepository,
};
use crate::repo::rating_repo::{JsonRatingRepository, RatingRepository, SqliteRatingRepository};
use crate::repo::settings_repo::{
    JsonSettingsRepository, SettingsCache, SettingsRepository, SqliteSettingsRepository,
};
use crate::repo::RepoResult;
use crate::store::{FileStore, StoreError};
use log::info;
use rusqlite::Connection;
use std::path::Path;

/// Repository trait objects over one backend.
pub struct Repositories<'a> {
    pub products: Box<dyn ProductRepository + 'a>,
    pub categories: Box<dyn CategoryRepository + 'a>,
    pub orders: Box<dyn OrderRepository + 'a>,
    pub ratings: Box<dyn RatingRepository + 'a>,
    pub settings: Box<dyn SettingsRepository + 'a>,
    pub newsletter: Box<dyn NewsletterRepository + 'a>,
    pub ads: Box<dyn AdRepository + 'a>,
}

enum Backend {
    Json {
        store: FileStore,
        settings_cache: SettingsCache,
    },
    Sqlite {
        conn: Connection,
    },
}

/// An opened storage backend.
pub struct Storage {
    backend: Backend,
}

impl Storage {
    /// Opens the backend described by `config`.
    pub fn open(config: &StorageConfig) -> RepoResult<Self> {
        let storage = match config {
            StorageConfig::Json { data_dir } => Self::open_json(data_dir)?,
            StorageConfig::Sqlite { path } => Self::open_sqlite(path)?,
        };
        info!(
            "event=storage_open module=storage status=ok backend={}",
            storage.backend().as_str()
        );
        Ok(storage)
    }

    pub fn open_json(data_dir: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self {
            backend: Backend::Json {
                store: FileStore::open(data_dir)?,
                settings_cache: SettingsCache::default(),
            },
        })
    }

    pub fn open_sqlite(path: impl AsRef<Path>) -> RepoResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    document: path.as_ref().display().to_string(),
                    source,
                })?;
            }
        }
        Ok(Self {
            backend: Backend::Sqlite {
                conn: open_db(path)?,
            },
        })
    }

    /// Private in-memory SQLite backend.
    pub fn open_sqlite_in_memory() -> RepoResult<Self> {
        Ok(Self {
            backend: Backend::Sqlite {
                conn: open_db_in_memory()?,
            },
        })
    }

    pub fn backend(&self) -> StorageBackend {
        match self.backend {
            Backend::Json { .. } => StorageBackend::Json,
            Backend::Sqlite { .. } => StorageBackend::Sqlite,
        }
    }

    /// Builds the repository bundle for this backend.
    pub fn repositories(&self) -> RepoResult<Repositories<'_>> {
        match &self.backend {
            Backend::Json {
                store,
                settings_cache,
            } => Ok(Repositories {
                products: Box::new(JsonProductRepository::new(store.clone())),
                categories: Box::new(JsonCategoryRepository::new(store.clone())),
                orders: Box::new(JsonOrderRepository::new(store.clone())),
                ratings: Box::new(JsonRatingRepository::new(store.clone())),
                settings: Box::new(JsonSettingsRepository::with_cache(
                    store.clone(),
                    settings_cache.clone(),
                )),
                newsletter: Box::new(JsonNewsletterRepository::new(store.clone())),
                ads: Box::new(JsonAdRepository::new(store.clone())),
            }),
            Backend::Sqlite { conn } => Ok(Repositories {
                products: Box::new(SqliteProductRepository::try_new(conn)?),
                categories: Box::new(SqliteCategoryRepository::try_new(conn)?),
                orders: Box::new(SqliteOrderRepository::try_new(conn)?),
                ratings: Box::new(SqliteRatingRepository::try_new(conn)?),
                settings: Box::new(SqliteSettingsRepository::try_new(conn)?),
                newsletter: Box::new(SqliteNewsletterRepository::try_new(conn)?),
                ads: Box::new(SqliteAdRepository::try_new(conn)?),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Storage;
    use crate::config::{StorageBackend, StorageConfig};
    use crate::model::settings::{Settings, KEY_SITE_NAME};
    use serde_json::json;

    #[test]
    fn open_selects_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let json = Storage::open(&StorageConfig::Json {
            data_dir: dir.path().join("docs"),
        })
        .unwrap();
        assert_eq!(json.backend(), StorageBackend::Json);

        let sqlite = Storage::open(&StorageConfig::Sqlite {
            path: dir.path().join("db").join("angel.sqlite3"),
        })
        .unwrap();
        assert_eq!(sqlite.backend(), StorageBackend::Sqlite);
        assert!(dir.path().join("db").join("angel.sqlite3").exists());
    }

    #[test]
    fn json_bundles_share_the_settings_cache() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open_json(dir.path()).unwrap();
        let first = storage.repositories().unwrap();
        let second = storage.repositories().unwrap();

        assert!(second.settings.load_settings().unwrap().is_empty());
        first
            .settings
            .update_settings(&Settings::new().with(KEY_SITE_NAME, json!("Angel")))
            .unwrap();
        assert_eq!(
            second.settings.load_settings().unwrap().site_name().as_deref(),
            Some("Angel")
        );
    }
}
