//! Storefront domain model.
//!
//! # Responsibility
//! - Define the records persisted by every storage backend.
//! - Define partial-update patches and their pure merge functions.
//!
//! # Invariants
//! - Integer ids are assigned by storage, never by callers.
//! - Patches only touch fields that are explicitly set.
//! - Order line items are value snapshots, independent of live products.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod ad;
pub mod category;
pub mod newsletter;
pub mod order;
pub mod product;
pub mod rating;
pub mod settings;

/// Unmodeled keys of a JSON document record.
///
/// Legacy documents follow convention rather than a schema; keys a record
/// does not name are kept here and written back unchanged.
pub type ExtraFields = serde_json::Map<String, serde_json::Value>;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex")
});

/// Field-level validation failure raised before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required text field is blank after trim.
    EmptyField(&'static str),
    /// Numeric field must not be negative.
    Negative(&'static str),
    /// Numeric field is outside its inclusive range.
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        actual: i64,
    },
    /// Email address is not well-formed.
    InvalidEmail,
    /// Collection field must contain at least one element.
    EmptyCollection(&'static str),
    /// Record references itself as its own parent.
    SelfReference(&'static str),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField(field) => write!(f, "{field} must not be blank"),
            Self::Negative(field) => write!(f, "{field} must not be negative"),
            Self::OutOfRange {
                field,
                min,
                max,
                actual,
            } => write!(f, "{field} must be between {min} and {max}, got {actual}"),
            Self::InvalidEmail => write!(f, "email address is not valid"),
            Self::EmptyCollection(field) => write!(f, "{field} must not be empty"),
            Self::SelfReference(field) => write!(f, "{field} must not reference itself"),
        }
    }
}

impl Error for ValidationError {}

/// Returns whether `value` looks like a deliverable email address.
pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value.trim())
}

pub(crate) fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    Ok(())
}

/// Deserializes an optional weak reference id.
///
/// Legacy documents store references as numbers, numeric strings, `0` or
/// `null`; `0` and blank strings mean "no reference".
pub(crate) fn optional_ref<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let id = match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Number(number)) => number.as_i64(),
        Some(serde_json::Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.parse::<i64>().map_err(serde::de::Error::custom)?)
            }
        }
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected id reference, got {other}"
            )))
        }
    };
    Ok(id.filter(|id| *id != 0))
}
