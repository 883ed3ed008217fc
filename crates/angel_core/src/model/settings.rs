//! Site-wide settings singleton.
//!
//! Settings are an open key/value mapping so new keys need no migration.
//! Typed accessors cover the keys core logic depends on.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const KEY_CURRENCIES: &str = "currencies";
pub const KEY_DEFAULT_CURRENCY: &str = "default_currency";
pub const KEY_SHIPPING_COST: &str = "shipping_cost";
pub const KEY_FREE_SHIPPING_THRESHOLD: &str = "free_shipping_threshold";
pub const KEY_SITE_NAME: &str = "site_name";
pub const KEY_SITE_EMAIL: &str = "site_email";

const FALLBACK_CURRENCY: &str = "GBP";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: BTreeMap<String, Value>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Shallow merge: keys in `patch` overwrite, other keys are kept.
    pub fn merge(&mut self, patch: &Settings) {
        for (key, value) in &patch.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Enabled currency codes, uppercase. Never empty.
    pub fn currencies(&self) -> Vec<String> {
        let codes: Vec<String> = match self.values.get(KEY_CURRENCIES) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|code| code.trim().to_ascii_uppercase())
                .filter(|code| !code.is_empty())
                .collect(),
            Some(Value::String(list)) => list
                .split(',')
                .map(|code| code.trim().to_ascii_uppercase())
                .filter(|code| !code.is_empty())
                .collect(),
            _ => Vec::new(),
        };
        if codes.is_empty() {
            vec![self.default_currency()]
        } else {
            codes
        }
    }

    pub fn default_currency(&self) -> String {
        self.text(KEY_DEFAULT_CURRENCY)
            .map(|code| code.trim().to_ascii_uppercase())
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| FALLBACK_CURRENCY.to_string())
    }

    pub fn supports_currency(&self, currency: &str) -> bool {
        self.currencies()
            .iter()
            .any(|code| code.eq_ignore_ascii_case(currency))
    }

    /// Flat shipping charge; zero when unset.
    pub fn shipping_cost(&self) -> Decimal {
        self.decimal(KEY_SHIPPING_COST).unwrap_or(Decimal::ZERO)
    }

    /// Order subtotal at or above which shipping is free.
    pub fn free_shipping_threshold(&self) -> Option<Decimal> {
        self.decimal(KEY_FREE_SHIPPING_THRESHOLD)
    }

    /// Shipping charged for an order with the given subtotal.
    pub fn shipping_for(&self, subtotal: Decimal) -> Decimal {
        match self.free_shipping_threshold() {
            Some(threshold) if subtotal >= threshold => Decimal::ZERO,
            _ => self.shipping_cost(),
        }
    }

    pub fn site_name(&self) -> Option<String> {
        self.text(KEY_SITE_NAME)
    }

    pub fn site_email(&self) -> Option<String> {
        self.text(KEY_SITE_EMAIL)
    }

    fn text(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn decimal(&self, key: &str) -> Option<Decimal> {
        match self.values.get(key)? {
            Value::Number(number) => number.to_string().parse().ok(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}
