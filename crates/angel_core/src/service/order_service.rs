//! Order administration service.
//!
//! # Invariants
//! - Statuses are free text but never blank; values are stored trimmed and
//!   lowercase.
//! - Items and totals of a stored order are never rewritten.

use super::{ShopError, ShopResult};
use crate::model::is_valid_email;
use crate::model::order::{Order, OrderPatch};
use crate::repo::order_repo::{OrderQuery, OrderRepository};
use crate::storage::Repositories;
use chrono::Utc;
use log::info;

pub struct OrderService<'a> {
    orders: &'a dyn OrderRepository,
}

impl<'a> OrderService<'a> {
    pub fn new(repos: &'a Repositories<'_>) -> Self {
        Self::from_repo(repos.orders.as_ref())
    }

    pub fn from_repo(orders: &'a dyn OrderRepository) -> Self {
        Self { orders }
    }

    /// Orders newest first.
    pub fn list(&self, query: &OrderQuery) -> ShopResult<Vec<Order>> {
        Ok(self.orders.list_orders(query)?)
    }

    pub fn get(&self, id: &str) -> ShopResult<Order> {
        self.orders
            .get_order(id)?
            .ok_or_else(|| ShopError::not_found("order", id))
    }

    pub fn set_status(&self, id: &str, status: &str) -> ShopResult<Order> {
        let status = required_status("status", status)?;
        self.apply(id, OrderPatch::new().status(status.as_str()))?;
        info!("event=order_status module=orders status=ok order_id={id} order_status={status}");
        self.get(id)
    }

    pub fn set_payment_status(&self, id: &str, payment_status: &str) -> ShopResult<Order> {
        let payment_status = required_status("payment status", payment_status)?;
        self.apply(id, OrderPatch::new().payment_status(payment_status.as_str()))?;
        info!(
            "event=order_payment_status module=orders status=ok order_id={id} payment_status={payment_status}"
        );
        self.get(id)
    }

    pub fn set_notes(&self, id: &str, notes: Option<String>) -> ShopResult<Order> {
        let notes = notes
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        self.apply(id, OrderPatch::new().notes(notes))?;
        self.get(id)
    }

    /// Orders placed with `email`, newest first.
    pub fn customer_history(&self, email: &str) -> ShopResult<Vec<Order>> {
        if !is_valid_email(email) {
            return Err(ShopError::validation("email address is not valid"));
        }
        self.list(&OrderQuery::all().for_customer(email.trim()))
    }

    pub fn delete(&self, id: &str) -> ShopResult<()> {
        if !self.orders.delete_order(id)? {
            return Err(ShopError::not_found("order", id));
        }
        info!("event=order_delete module=orders status=ok order_id={id}");
        Ok(())
    }

    fn apply(&self, id: &str, patch: OrderPatch) -> ShopResult<()> {
        let patch = patch.touched_at(Utc::now());
        if !self.orders.update_order(id, &patch)? {
            return Err(ShopError::not_found("order", id));
        }
        Ok(())
    }
}

fn required_status(field: &str, value: &str) -> ShopResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ShopError::validation(format!("{field} must not be blank")));
    }
    Ok(value.to_ascii_lowercase())
}
