//! Promotional banner record.

use crate::model::{require_text, ExtraFields, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AdId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ad {
    #[serde(default)]
    pub id: AdId,
    pub title: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub link_url: String,
    /// Placement slot, e.g. `home_hero` or `sidebar`.
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Keys the document carries that this record does not model.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Ad {
    pub fn new(title: impl Into<String>, position: impl Into<String>) -> Self {
        Self {
            id: 0,
            title: title.into(),
            image_url: String::new(),
            link_url: String::new(),
            position: position.into(),
            active: true,
            sort_order: 0,
            created_at: None,
            extra: ExtraFields::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdPatch {
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub link_url: Option<String>,
    pub position: Option<String>,
    pub active: Option<bool>,
    pub sort_order: Option<i64>,
}

impl AdPatch {
    pub fn apply(&self, ad: &mut Ad) {
        if let Some(value) = &self.title {
            ad.title = value.clone();
        }
        if let Some(value) = &self.image_url {
            ad.image_url = value.clone();
        }
        if let Some(value) = &self.link_url {
            ad.link_url = value.clone();
        }
        if let Some(value) = &self.position {
            ad.position = value.clone();
        }
        if let Some(value) = self.active {
            ad.active = value;
        }
        if let Some(value) = self.sort_order {
            ad.sort_order = value;
        }
    }
}
