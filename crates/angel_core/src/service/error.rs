//! Caller-facing error taxonomy for storefront use cases.
//!
//! # Invariants
//! - `Validation` and `NotFound` are never retryable.
//! - `public_message` never contains storage or upstream internals.

use crate::cart::CartError;
use crate::integrations::UpstreamError;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ShopResult<T> = Result<T, ShopError>;

#[derive(Debug)]
pub enum ShopError {
    NotFound { entity: &'static str, id: String },
    /// Malformed input, invalid option, insufficient stock and similar.
    Validation(String),
    /// Storage failure; the operation may succeed on retry.
    Storage(RepoError),
    /// A collaborator (payment, mail, bot gate) failed.
    Upstream(UpstreamError),
}

impl ShopError {
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable machine-readable code for logs and API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation_failed",
            Self::Storage(_) => "storage_failed",
            Self::Upstream(_) => "upstream_failed",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Upstream(_))
    }

    /// Message safe to show to an end user.
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound { entity, .. } => format!("The requested {entity} was not found."),
            Self::Validation(message) => message.clone(),
            Self::Storage(_) => "We could not save your changes. Please try again.".to_string(),
            Self::Upstream(_) => {
                "A partner service is unavailable right now. Please try again.".to_string()
            }
        }
    }
}

impl Display for ShopError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Validation(message) => write!(f, "{message}"),
            Self::Storage(err) => write!(f, "storage failure: {err}"),
            Self::Upstream(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ShopError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::Upstream(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ShopError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err.to_string()),
            RepoError::Conflict(message) => Self::Validation(message),
            other => Self::Storage(other),
        }
    }
}

impl From<CartError> for ShopError {
    fn from(value: CartError) -> Self {
        match value {
            CartError::Repo(err) => err.into(),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<UpstreamError> for ShopError {
    fn from(value: UpstreamError) -> Self {
        Self::Upstream(value)
    }
}
