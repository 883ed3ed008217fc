//! Newsletter subscriber record.
//!
//! # Invariants
//! - Emails are stored trimmed and lowercase.
//! - Unsubscribing is a soft flag; rows are kept for audit.

use crate::model::{is_valid_email, ExtraFields, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SubscriberId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(default)]
    pub id: SubscriberId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribed_at: Option<DateTime<Utc>>,
    /// Keys the document carries that this record does not model.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

fn default_active() -> bool {
    true
}

impl Subscriber {
    pub fn new(email: &str) -> Self {
        Self {
            id: 0,
            email: normalize_email(email),
            name: None,
            active: true,
            subscribed_at: None,
            extra: ExtraFields::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_valid_email(&self.email) {
            return Err(ValidationError::InvalidEmail);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberPatch {
    pub name: Option<Option<String>>,
    pub active: Option<bool>,
    pub subscribed_at: Option<DateTime<Utc>>,
}

impl SubscriberPatch {
    pub fn apply(&self, subscriber: &mut Subscriber) {
        if let Some(value) = &self.name {
            subscriber.name = value.clone();
        }
        if let Some(value) = self.active {
            subscriber.active = value;
        }
        if let Some(value) = self.subscribed_at {
            subscriber.subscribed_at = Some(value);
        }
    }
}

/// Canonical form used for storage and lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
