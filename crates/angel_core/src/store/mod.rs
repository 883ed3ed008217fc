//! Flat-file JSON document storage.
//!
//! # Responsibility
//! - Persist named JSON documents under one data directory.
//! - Serialize writers per document with an exclusive advisory lock.
//!
//! # Invariants
//! - Readers never observe a partially written document.
//! - Read-modify-write cycles run entirely under the document lock.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod file_store;

pub use file_store::{FileStore, Outcome};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Document names are restricted to `[a-z0-9_-]`.
    InvalidName(String),
    Io {
        document: String,
        source: std::io::Error,
    },
    Lock {
        document: String,
        source: std::io::Error,
    },
    /// Stored bytes are not valid JSON for the expected shape.
    Corrupt {
        document: String,
        source: serde_json::Error,
    },
    Encode {
        document: String,
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn document(&self) -> &str {
        match self {
            Self::InvalidName(name) => name,
            Self::Io { document, .. }
            | Self::Lock { document, .. }
            | Self::Corrupt { document, .. }
            | Self::Encode { document, .. } => document,
        }
    }

    pub(crate) fn code(&self) -> &'static str {
        match self {
            Self::InvalidName(_) => "store_invalid_name",
            Self::Io { .. } => "store_io_failed",
            Self::Lock { .. } => "store_lock_failed",
            Self::Corrupt { .. } => "store_corrupt_document",
            Self::Encode { .. } => "store_encode_failed",
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid document name `{name}`"),
            Self::Io { document, source } => {
                write!(f, "i/o failure on document `{document}`: {source}")
            }
            Self::Lock { document, source } => {
                write!(f, "failed to lock document `{document}`: {source}")
            }
            Self::Corrupt { document, source } => {
                write!(f, "document `{document}` is not valid JSON: {source}")
            }
            Self::Encode { document, source } => {
                write!(f, "failed to encode document `{document}`: {source}")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidName(_) => None,
            Self::Io { source, .. } | Self::Lock { source, .. } => Some(source),
            Self::Corrupt { source, .. } | Self::Encode { source, .. } => Some(source),
        }
    }
}
