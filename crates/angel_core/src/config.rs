//! Process configuration and storage backend selection.
//!
//! # Responsibility
//! - Read environment configuration once at startup.
//! - Decide which storage backend backs every repository.
//!
//! # Invariants
//! - A missing or unknown backend flag fails at startup, never per request.
//! - `AppConfig` is immutable after load and passed by reference.

use crate::logging::{default_log_level, normalize_level};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const ENV_STORAGE_BACKEND: &str = "ANGEL_STORAGE_BACKEND";
pub const ENV_DATA_DIR: &str = "ANGEL_DATA_DIR";
pub const ENV_DB_PATH: &str = "ANGEL_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "ANGEL_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "ANGEL_LOG_DIR";
pub const ENV_DEFAULT_CURRENCY: &str = "ANGEL_DEFAULT_CURRENCY";

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_DB_FILE: &str = "angel.sqlite3";
const DEFAULT_CURRENCY: &str = "GBP";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "required setting `{key}` is not set"),
            Self::Invalid { key, value } => write!(f, "invalid value `{value}` for `{key}`"),
        }
    }
}

impl Error for ConfigError {}

/// Storage technology behind the repository contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// One JSON document per entity type.
    Json,
    /// Embedded SQLite database.
    Sqlite,
}

impl StorageBackend {
    /// Parses the backend flag. `file` and `relational` are accepted aliases.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "file" => Some(Self::Json),
            "sqlite" | "relational" => Some(Self::Sqlite),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Where the selected backend keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Json { data_dir: PathBuf },
    Sqlite { path: PathBuf },
}

impl StorageConfig {
    pub fn backend(&self) -> StorageBackend {
        match self {
            Self::Json { .. } => StorageBackend::Json,
            Self::Sqlite { .. } => StorageBackend::Sqlite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub log_level: &'static str,
    pub log_dir: Option<PathBuf>,
    /// Uppercase code used when neither the session nor settings pick one.
    pub default_currency: String,
}

impl AppConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a key to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let backend_flag =
            read(ENV_STORAGE_BACKEND).ok_or(ConfigError::Missing(ENV_STORAGE_BACKEND))?;
        let backend =
            StorageBackend::parse(&backend_flag).ok_or_else(|| ConfigError::Invalid {
                key: ENV_STORAGE_BACKEND,
                value: backend_flag.clone(),
            })?;

        let data_dir = read(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let storage = match backend {
            StorageBackend::Json => StorageConfig::Json { data_dir },
            StorageBackend::Sqlite => StorageConfig::Sqlite {
                path: read(ENV_DB_PATH)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| data_dir.join(DEFAULT_DB_FILE)),
            },
        };

        let log_level = match read(ENV_LOG_LEVEL) {
            Some(value) => normalize_level(&value).map_err(|_| ConfigError::Invalid {
                key: ENV_LOG_LEVEL,
                value,
            })?,
            None => default_log_level(),
        };

        let default_currency = match read(ENV_DEFAULT_CURRENCY) {
            Some(value) => {
                let code = value.trim().to_ascii_uppercase();
                if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(ConfigError::Invalid {
                        key: ENV_DEFAULT_CURRENCY,
                        value,
                    });
                }
                code
            }
            None => DEFAULT_CURRENCY.to_string(),
        };

        Ok(Self {
            storage,
            log_level,
            log_dir: read(ENV_LOG_DIR).map(PathBuf::from),
            default_currency,
        })
    }

    pub fn backend(&self) -> StorageBackend {
        self.storage.backend()
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, ConfigError, StorageBackend, StorageConfig};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn backend_flag_is_required() {
        assert_eq!(
            load(&[]),
            Err(ConfigError::Missing("ANGEL_STORAGE_BACKEND"))
        );
        assert!(matches!(
            load(&[("ANGEL_STORAGE_BACKEND", "mysql")]),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn aliases_select_the_same_backend() {
        assert_eq!(StorageBackend::parse("FILE"), Some(StorageBackend::Json));
        assert_eq!(
            StorageBackend::parse(" relational "),
            Some(StorageBackend::Sqlite)
        );
    }

    #[test]
    fn sqlite_path_defaults_under_data_dir() {
        let config = load(&[
            ("ANGEL_STORAGE_BACKEND", "sqlite"),
            ("ANGEL_DATA_DIR", "/srv/angel"),
        ])
        .unwrap();
        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                path: PathBuf::from("/srv/angel/angel.sqlite3")
            }
        );
        assert_eq!(config.default_currency, "GBP");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = load(&[
            ("ANGEL_STORAGE_BACKEND", "json"),
            ("ANGEL_LOG_LEVEL", "WARNING"),
            ("ANGEL_DEFAULT_CURRENCY", "eur"),
            ("ANGEL_LOG_DIR", "/var/log/angel"),
        ])
        .unwrap();
        assert_eq!(config.backend(), StorageBackend::Json);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.default_currency, "EUR");
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/angel")));
    }

    #[test]
    fn malformed_currency_is_rejected() {
        assert!(matches!(
            load(&[
                ("ANGEL_STORAGE_BACKEND", "json"),
                ("ANGEL_DEFAULT_CURRENCY", "pounds"),
            ]),
            Err(ConfigError::Invalid { key: "ANGEL_DEFAULT_CURRENCY", .. })
        ));
    }
}
