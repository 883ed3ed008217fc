//! Product rating record.

use crate::model::product::ProductId;
use crate::model::{require_text, ExtraFields, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RatingId = i64;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    #[serde(default)]
    pub id: RatingId,
    pub product_id: ProductId,
    pub rating: u8,
    #[serde(default)]
    pub review: String,
    #[serde(default)]
    pub reviewer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Keys the document carries that this record does not model.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Rating {
    pub fn new(product_id: ProductId, rating: u8, reviewer_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            product_id,
            rating,
            review: String::new(),
            reviewer_name: reviewer_name.into(),
            reviewer_email: None,
            created_at: None,
            extra: ExtraFields::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(MIN_RATING..=MAX_RATING).contains(&self.rating) {
            return Err(ValidationError::OutOfRange {
                field: "rating",
                min: i64::from(MIN_RATING),
                max: i64::from(MAX_RATING),
                actual: i64::from(self.rating),
            });
        }
        require_text("reviewer_name", &self.reviewer_name)
    }
}

/// Moderation edit for [`Rating`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RatingPatch {
    pub rating: Option<u8>,
    pub review: Option<String>,
    pub reviewer_name: Option<String>,
}

impl RatingPatch {
    pub fn apply(&self, rating: &mut Rating) {
        if let Some(value) = self.rating {
            rating.rating = value;
        }
        if let Some(value) = &self.review {
            rating.review = value.clone();
        }
        if let Some(value) = &self.reviewer_name {
            rating.reviewer_name = value.clone();
        }
    }
}
