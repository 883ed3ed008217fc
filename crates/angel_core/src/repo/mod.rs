//! Repository contracts and their two storage backends.
//!
//! # Responsibility
//! - Define one backend-agnostic contract per entity type.
//! - Implement every contract over JSON documents (`Json*Repository`) and
//!   over SQLite (`Sqlite*Repository`) with identical observable behavior.
//!
//! # Invariants
//! - Write paths validate records before any mutation.
//! - Missing ids are a sentinel (`None`/`false`), never an error.
//! - Partial updates go through the pure `*Patch::apply` merge functions so
//!   both backends merge identically.
//! - Ids are never reused, including the id of a deleted maximum row.

use crate::db::DbError;
use crate::model::ValidationError;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod ad_repo;
pub mod category_repo;
mod json_table;
pub mod newsletter_repo;
pub mod order_repo;
pub mod product_repo;
pub mod rating_repo;
pub mod settings_repo;
mod sql_support;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// Record failed write-time validation; nothing was written.
    Validation(ValidationError),
    /// JSON document store failure.
    Store(StoreError),
    /// SQLite failure.
    Db(DbError),
    /// Persisted data cannot be mapped back to a valid record.
    InvalidData(String),
    /// Write rejected because it would clash with existing data.
    Conflict(String),
    /// Connection schema is not at the migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl RepoError {
    /// Storage-side failures may succeed on retry; validation never does.
    pub fn is_storage_failure(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Conflict(message) => write!(f, "conflicting write: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
