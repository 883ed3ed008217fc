//! Product category record.
//!
//! # Invariants
//! - `parent_id == None` marks a root category.
//! - A category never lists itself as its own parent.
//! - Deeper cycles are rejected by the catalog service on write.

use crate::model::{optional_ref, require_text, ExtraFields, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type CategoryId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub id: CategoryId,
    #[serde(default)]
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Weak self-reference; `0` in legacy documents means root.
    #[serde(default, deserialize_with = "optional_ref")]
    pub parent_id: Option<CategoryId>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Keys the document carries that this record does not model.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Category {
    /// Creates an active root category draft.
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: 0,
            slug: slug.into(),
            name: name.into(),
            description: String::new(),
            parent_id: None,
            active: true,
            featured: false,
            sort_order: 0,
            created_at: None,
            updated_at: None,
            extra: ExtraFields::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)?;
        if self.id != 0 && self.parent_id == Some(self.id) {
            return Err(ValidationError::SelfReference("parent_id"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPatch {
    pub slug: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<Option<CategoryId>>,
    pub active: Option<bool>,
    pub featured: Option<bool>,
    pub sort_order: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CategoryPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = Some(value.into());
        self
    }

    pub fn parent(mut self, value: Option<CategoryId>) -> Self {
        self.parent_id = Some(value);
        self
    }

    pub fn active(mut self, value: bool) -> Self {
        self.active = Some(value);
        self
    }

    pub fn touched_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    pub fn apply(&self, category: &mut Category) {
        if let Some(value) = &self.slug {
            category.slug = value.clone();
        }
        if let Some(value) = &self.name {
            category.name = value.clone();
        }
        if let Some(value) = &self.description {
            category.description = value.clone();
        }
        if let Some(value) = self.parent_id {
            category.parent_id = value;
        }
        if let Some(value) = self.active {
            category.active = value;
        }
        if let Some(value) = self.featured {
            category.featured = value;
        }
        if let Some(value) = self.sort_order {
            category.sort_order = value;
        }
        if let Some(value) = self.updated_at {
            category.updated_at = Some(value);
        }
    }
}
