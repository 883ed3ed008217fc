//! Order record and line-item snapshots.
//!
//! # Responsibility
//! - Define the persisted order shape including address and item snapshots.
//! - Generate human-readable order references.
//!
//! # Invariants
//! - `items` carry name/price copied at purchase time; product edits never
//!   rewrite them.
//! - `status` and `payment_status` are free text; well-known values are
//!   exposed as constants.
//! - Totals are stored, never recomputed on read.

use crate::model::product::ProductId;
use crate::model::{is_valid_email, require_text, ExtraFields, ValidationError};
use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order reference, formatted `AMP<year><6 digits>`.
pub type OrderId = String;

pub const ORDER_ID_PREFIX: &str = "AMP";

pub mod status {
    pub const PENDING: &str = "pending";
    pub const PROCESSING: &str = "processing";
    pub const SHIPPED: &str = "shipped";
    pub const COMPLETED: &str = "completed";
    pub const CANCELLED: &str = "cancelled";
    pub const REFUNDED: &str = "refunded";
}

pub mod payment_status {
    pub const UNPAID: &str = "unpaid";
    pub const PAID: &str = "paid";
    pub const FAILED: &str = "failed";
    pub const REFUNDED: &str = "refunded";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub postcode: String,
    #[serde(default)]
    pub country: String,
}

/// Snapshot of one purchased cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub subtotal: Decimal,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl OrderItem {
    /// Builds a snapshot with `subtotal = price * quantity`.
    pub fn snapshot(
        product_id: ProductId,
        name: impl Into<String>,
        price: Decimal,
        quantity: u32,
    ) -> Self {
        Self {
            product_id,
            name: name.into(),
            price,
            quantity,
            size: None,
            color: None,
            subtotal: price * Decimal::from(quantity),
            extra: ExtraFields::new(),
        }
    }

    pub fn with_variant(mut self, size: Option<String>, color: Option<String>) -> Self {
        self.size = size;
        self.color = color;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Empty on create means "generate one".
    #[serde(default)]
    pub id: OrderId,
    pub customer_name: String,
    pub customer_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub shipping_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub subtotal: Decimal,
    #[serde(default)]
    pub shipping_cost: Decimal,
    #[serde(default)]
    pub total: Decimal,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_payment_status")]
    pub payment_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Keys the document carries that this record does not model.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

fn default_status() -> String {
    status::PENDING.to_string()
}

fn default_payment_status() -> String {
    payment_status::UNPAID.to_string()
}

impl Order {
    /// Builds a pending order whose totals are derived from `items`.
    pub fn from_items(
        customer_name: impl Into<String>,
        customer_email: impl Into<String>,
        currency: impl Into<String>,
        items: Vec<OrderItem>,
        shipping_cost: Decimal,
    ) -> Self {
        let subtotal = items.iter().map(|item| item.subtotal).sum::<Decimal>();
        Self {
            id: OrderId::new(),
            customer_name: customer_name.into(),
            customer_email: customer_email.into(),
            customer_phone: None,
            shipping_address: Address::default(),
            billing_address: None,
            items,
            currency: currency.into(),
            subtotal,
            shipping_cost,
            total: subtotal + shipping_cost,
            status: default_status(),
            payment_status: default_payment_status(),
            payment_intent_id: None,
            notes: None,
            created_at: None,
            updated_at: None,
            extra: ExtraFields::new(),
        }
    }

    /// Sum of item quantities.
    pub fn item_count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("customer_name", &self.customer_name)?;
        require_text("customer_email", &self.customer_email)?;
        if !is_valid_email(&self.customer_email) {
            return Err(ValidationError::InvalidEmail);
        }
        if self.items.is_empty() {
            return Err(ValidationError::EmptyCollection("items"));
        }
        for item in &self.items {
            if item.quantity == 0 {
                return Err(ValidationError::OutOfRange {
                    field: "quantity",
                    min: 1,
                    max: i64::from(u32::MAX),
                    actual: 0,
                });
            }
            if item.price.is_sign_negative() {
                return Err(ValidationError::Negative("price"));
            }
        }
        if self.total.is_sign_negative() || self.shipping_cost.is_sign_negative() {
            return Err(ValidationError::Negative("total"));
        }
        require_text("status", &self.status)?;
        require_text("payment_status", &self.payment_status)?;
        Ok(())
    }
}

/// Partial update for [`Order`]. Items and totals are immutable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub payment_intent_id: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub customer_phone: Option<Option<String>>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Option<Address>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, value: impl Into<String>) -> Self {
        self.status = Some(value.into());
        self
    }

    pub fn payment_status(mut self, value: impl Into<String>) -> Self {
        self.payment_status = Some(value.into());
        self
    }

    pub fn notes(mut self, value: Option<String>) -> Self {
        self.notes = Some(value);
        self
    }

    pub fn touched_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    pub fn apply(&self, order: &mut Order) {
        if let Some(value) = &self.status {
            order.status = value.clone();
        }
        if let Some(value) = &self.payment_status {
            order.payment_status = value.clone();
        }
        if let Some(value) = &self.payment_intent_id {
            order.payment_intent_id = value.clone();
        }
        if let Some(value) = &self.notes {
            order.notes = value.clone();
        }
        if let Some(value) = &self.customer_phone {
            order.customer_phone = value.clone();
        }
        if let Some(value) = &self.shipping_address {
            order.shipping_address = value.clone();
        }
        if let Some(value) = &self.billing_address {
            order.billing_address = value.clone();
        }
        if let Some(value) = self.updated_at {
            order.updated_at = Some(value);
        }
    }
}

/// Generates an order reference like `AMP2026042137`.
///
/// Uniqueness is not guaranteed here; repositories retry on collision.
pub fn generate_order_id(now: DateTime<Utc>, rng: &mut impl Rng) -> OrderId {
    let suffix: u32 = rng.random_range(0..1_000_000);
    format!("{ORDER_ID_PREFIX}{}{suffix:06}", now.year())
}

#[cfg(test)]
mod tests {
    use super::{generate_order_id, Order, OrderItem, OrderPatch};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    #[test]
    fn order_id_has_prefix_year_and_six_digits() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let id = generate_order_id(now, &mut rand::rng());
        assert!(id.starts_with("AMP2026"));
        assert_eq!(id.len(), "AMP2026".len() + 6);
        assert!(id["AMP2026".len()..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn totals_are_derived_from_item_snapshots() {
        let items = vec![
            OrderItem::snapshot(1, "Mug", Decimal::new(1000, 2), 5),
            OrderItem::snapshot(2, "Tee", Decimal::new(1550, 2), 1),
        ];
        let order = Order::from_items("Ann", "ann@example.com", "GBP", items, Decimal::new(395, 2));
        assert_eq!(order.subtotal, Decimal::new(6550, 2));
        assert_eq!(order.total, Decimal::new(6945, 2));
        assert_eq!(order.item_count(), 6);
        assert!(order.validate().is_ok());
    }

    #[test]
    fn validation_rejects_empty_items_and_bad_email() {
        let mut order = Order::from_items("Ann", "ann@example.com", "GBP", vec![], Decimal::ZERO);
        assert!(order.validate().is_err());

        order.items = vec![OrderItem::snapshot(1, "Mug", Decimal::ONE, 1)];
        order.customer_email = "not-an-email".to_string();
        assert!(order.validate().is_err());
    }

    #[test]
    fn patch_updates_status_without_touching_items() {
        let items = vec![OrderItem::snapshot(1, "Mug", Decimal::new(1000, 2), 2)];
        let mut order = Order::from_items("Ann", "ann@example.com", "GBP", items.clone(), Decimal::ZERO);
        OrderPatch::new().status("shipped").apply(&mut order);
        assert_eq!(order.status, "shipped");
        assert_eq!(order.items, items);
    }
}
