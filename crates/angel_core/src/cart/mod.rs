//! Shopping cart primitives.
//!
//! # Responsibility
//! - Identify cart lines by a structured `(product, size, color)` key.
//! - Enforce quantity, availability, option and stock rules on every change.
//!
//! # Invariants
//! - Two additions with equal keys merge into one line.
//! - Per product, the quantity across all variant lines never exceeds the
//!   product's stock at the time of the change.
//! - Totals are recomputed from live product prices on every call.

use crate::model::product::ProductId;
use crate::repo::RepoError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod cart_session;

pub use cart_session::{CartSession, PricedLine};

/// Variant selection supplied when adding a product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartOptions {
    pub size: Option<String>,
    pub color: Option<String>,
}

impl CartOptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// Composite identity of a cart line.
///
/// Blank options normalize to `None`, so `Some("")` and `None` collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CartKey {
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl CartKey {
    pub fn new(product_id: ProductId, options: &CartOptions) -> Self {
        Self {
            product_id,
            size: normalize_option(options.size.as_deref()),
            color: normalize_option(options.color.as_deref()),
        }
    }

    /// Key for a product without variant options.
    pub fn plain(product_id: ProductId) -> Self {
        Self::new(product_id, &CartOptions::none())
    }
}

fn normalize_option(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub key: CartKey,
    pub quantity: u32,
}

#[derive(Debug)]
pub enum CartError {
    /// Quantity is not a positive integer that fits a cart line.
    InvalidQuantity(i64),
    /// Product is missing or inactive.
    ProductUnavailable(ProductId),
    MissingOption {
        product_id: ProductId,
        option: &'static str,
    },
    InvalidOption {
        product_id: ProductId,
        option: &'static str,
        value: String,
    },
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },
    /// A product-level update hit more than one variant line.
    AmbiguousVariant(ProductId),
    Repo(RepoError),
}

impl Display for CartError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuantity(quantity) => {
                write!(f, "quantity must be a positive integer, got {quantity}")
            }
            Self::ProductUnavailable(id) => write!(f, "product {id} is not available"),
            Self::MissingOption { product_id, option } => {
                write!(f, "product {product_id} requires a {option} selection")
            }
            Self::InvalidOption {
                product_id,
                option,
                value,
            } => write!(f, "product {product_id} has no {option} `{value}`"),
            Self::InsufficientStock {
                product_id,
                requested,
                available,
            } => write!(
                f,
                "insufficient stock for product {product_id}: requested {requested}, available {available}"
            ),
            Self::AmbiguousVariant(id) => write!(
                f,
                "product {id} has several variants in the cart; update one by key"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CartError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for CartError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}
