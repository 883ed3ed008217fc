//! Product catalog record.
//!
//! # Responsibility
//! - Define the canonical product shape shared by both backends.
//! - Resolve per-currency prices with the legacy single-price fallback.
//!
//! # Invariants
//! - `active == false` hides the product from every public read path.
//! - `category_id` is a weak reference; dangling ids are tolerated.
//! - `stock` is never negative after validation.

use crate::model::category::CategoryId;
use crate::model::{optional_ref, require_text, ExtraFields, ValidationError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Integer product identifier assigned by storage.
pub type ProductId = i64;

/// Canonical product record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Assigned on create; ignored when passed to `create_product`.
    #[serde(default)]
    pub id: ProductId,
    #[serde(default)]
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Gate for all public reads.
    #[serde(default)]
    pub active: bool,
    #[serde(default, deserialize_with = "optional_ref")]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub stock: i64,
    /// Currency code (e.g. `GBP`) to unit price.
    #[serde(default)]
    pub prices: BTreeMap<String, Decimal>,
    /// Legacy single price, used when `prices` has no entry for a currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_sizes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_colors: Vec<String>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Keys the document carries that this record does not model.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Product {
    /// Creates an inactive product draft with no prices and zero stock.
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: 0,
            slug: slug.into(),
            name: name.into(),
            description: String::new(),
            active: false,
            category_id: None,
            stock: 0,
            prices: BTreeMap::new(),
            price: None,
            available_sizes: Vec::new(),
            available_colors: Vec::new(),
            featured: false,
            image: None,
            created_at: None,
            updated_at: None,
            extra: ExtraFields::new(),
        }
    }

    /// Returns the unit price for `currency`.
    ///
    /// Falls back to the legacy `price` field when no per-currency entry
    /// exists. Currency codes compare case-insensitively.
    pub fn price_in(&self, currency: &str) -> Option<Decimal> {
        self.prices
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(currency))
            .map(|(_, amount)| *amount)
            .or(self.price)
    }

    /// Returns whether `size` is one of this product's offered sizes.
    pub fn offers_size(&self, size: &str) -> bool {
        self.available_sizes.iter().any(|value| value == size)
    }

    /// Returns whether `color` is one of this product's offered colors.
    pub fn offers_color(&self, color: &str) -> bool {
        self.available_colors.iter().any(|value| value == color)
    }

    /// Case-insensitive substring match against name and description.
    ///
    /// `needle` must already be lowercase.
    pub fn matches_text(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
    }

    /// Validates write-time invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)?;
        if self.stock < 0 {
            return Err(ValidationError::Negative("stock"));
        }
        if self.prices.values().any(|amount| amount.is_sign_negative())
            || self.price.is_some_and(|amount| amount.is_sign_negative())
        {
            return Err(ValidationError::Negative("price"));
        }
        if self.prices.keys().any(|code| code.trim().is_empty()) {
            return Err(ValidationError::EmptyField("currency"));
        }
        Ok(())
    }
}

/// Partial update for [`Product`].
///
/// Unset fields keep their stored value. Nested optional fields use
/// `Some(None)` to clear the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductPatch {
    pub slug: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
    pub category_id: Option<Option<CategoryId>>,
    pub stock: Option<i64>,
    pub prices: Option<BTreeMap<String, Decimal>>,
    pub price: Option<Option<Decimal>>,
    pub available_sizes: Option<Vec<String>>,
    pub available_colors: Option<Vec<String>>,
    pub featured: Option<bool>,
    pub image: Option<Option<String>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProductPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = Some(value.into());
        self
    }

    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.description = Some(value.into());
        self
    }

    pub fn active(mut self, value: bool) -> Self {
        self.active = Some(value);
        self
    }

    pub fn stock(mut self, value: i64) -> Self {
        self.stock = Some(value);
        self
    }

    pub fn prices(mut self, value: BTreeMap<String, Decimal>) -> Self {
        self.prices = Some(value);
        self
    }

    pub fn category(mut self, value: Option<CategoryId>) -> Self {
        self.category_id = Some(value);
        self
    }

    pub fn featured(mut self, value: bool) -> Self {
        self.featured = Some(value);
        self
    }

    pub fn touched_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Returns whether no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Shallow-merges set fields into `product`.
    pub fn apply(&self, product: &mut Product) {
        if let Some(value) = &self.slug {
            product.slug = value.clone();
        }
        if let Some(value) = &self.name {
            product.name = value.clone();
        }
        if let Some(value) = &self.description {
            product.description = value.clone();
        }
        if let Some(value) = self.active {
            product.active = value;
        }
        if let Some(value) = self.category_id {
            product.category_id = value;
        }
        if let Some(value) = self.stock {
            product.stock = value;
        }
        if let Some(value) = &self.prices {
            product.prices = value.clone();
        }
        if let Some(value) = self.price {
            product.price = value;
        }
        if let Some(value) = &self.available_sizes {
            product.available_sizes = value.clone();
        }
        if let Some(value) = &self.available_colors {
            product.available_colors = value.clone();
        }
        if let Some(value) = self.featured {
            product.featured = value;
        }
        if let Some(value) = &self.image {
            product.image = value.clone();
        }
        if let Some(value) = self.updated_at {
            product.updated_at = Some(value);
        }
    }
}
