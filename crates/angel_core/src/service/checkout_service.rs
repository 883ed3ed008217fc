//! Checkout use-case service.
//!
//! # Responsibility
//! - Price the session cart with shipping rules from settings.
//! - Start provider-side payment and turn a captured payment into an order.
//!
//! # Invariants
//! - Completion order: verified payment, reserved stock, persisted order,
//!   cleared cart. A failure at any step leaves later steps undone.
//! - Completing the same payment intent twice yields the same order.
//! - A failed confirmation mail never rolls back a persisted order.

use super::{ShopError, ShopResult};
use crate::cart::PricedLine;
use crate::context::RequestContext;
use crate::integrations::{
    to_minor_units, CheckoutLineItem, CheckoutSession, MailMessage, MailSender, Metadata,
    PaymentIntent, PaymentProcessor,
};
use crate::model::order::{payment_status, status, Address, Order, OrderItem};
use crate::model::product::ProductId;
use crate::model::settings::Settings;
use crate::repo::order_repo::OrderRepository;
use crate::repo::product_repo::{ProductRepository, StockReservation};
use crate::repo::RepoError;
use crate::repo::settings_repo::SettingsRepository;
use crate::storage::Repositories;
use log::{error, info, warn};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::time::Instant;

const METADATA_SESSION_ID: &str = "session_id";
const METADATA_CURRENCY: &str = "currency";

/// Priced cart with shipping and total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub currency: String,
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

impl Quote {
    pub fn item_count(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }
}

/// Buyer details captured by the checkout form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerDetails {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub notes: Option<String>,
}

/// Checkout service facade.
pub struct CheckoutService<'a> {
    products: &'a dyn ProductRepository,
    orders: &'a dyn OrderRepository,
    settings: &'a dyn SettingsRepository,
    payments: &'a dyn PaymentProcessor,
    mailer: &'a dyn MailSender,
}

impl<'a> CheckoutService<'a> {
    pub fn new(
        repos: &'a Repositories<'_>,
        payments: &'a dyn PaymentProcessor,
        mailer: &'a dyn MailSender,
    ) -> Self {
        Self {
            products: repos.products.as_ref(),
            orders: repos.orders.as_ref(),
            settings: repos.settings.as_ref(),
            payments,
            mailer,
        }
    }

    /// Prices the session cart at the request currency.
    ///
    /// Fails when the cart is empty or holds an item that can no longer be
    /// bought at that currency.
    pub fn quote(&self, ctx: &RequestContext<'_>) -> ShopResult<Quote> {
        let settings = self.settings.load_settings()?;
        self.quote_with(ctx, &settings)
    }

    /// Creates a provider-hosted checkout page for the session cart.
    pub fn start_hosted_checkout(
        &self,
        ctx: &RequestContext<'_>,
        success_url: &str,
        cancel_url: &str,
    ) -> ShopResult<CheckoutSession> {
        let quote = self.quote(ctx)?;
        let mut line_items = quote
            .lines
            .iter()
            .map(|line| {
                Ok(CheckoutLineItem {
                    name: line_label(line),
                    unit_amount_minor: minor_units(line.unit_price)?,
                    quantity: line.quantity,
                    currency: quote.currency.clone(),
                })
            })
            .collect::<ShopResult<Vec<_>>>()?;
        if quote.shipping > Decimal::ZERO {
            line_items.push(CheckoutLineItem {
                name: "Shipping".to_string(),
                unit_amount_minor: minor_units(quote.shipping)?,
                quantity: 1,
                currency: quote.currency.clone(),
            });
        }

        let session = self.payments.create_checkout_session(
            &line_items,
            success_url,
            cancel_url,
            &session_metadata(ctx, &quote.currency),
        )?;
        info!(
            "event=checkout_session_create module=checkout status=ok lines={}",
            line_items.len()
        );
        Ok(session)
    }

    /// Creates a payment intent for the quoted cart total.
    pub fn create_payment_intent(&self, ctx: &RequestContext<'_>) -> ShopResult<PaymentIntent> {
        let quote = self.quote(ctx)?;
        let intent = self.payments.create_payment_intent(
            minor_units(quote.total)?,
            &quote.currency,
            &session_metadata(ctx, &quote.currency),
        )?;
        info!(
            "event=payment_intent_create module=checkout status=ok intent_id={}",
            intent.id
        );
        Ok(intent)
    }

    /// Turns a captured payment into a persisted order and empties the cart.
    ///
    /// Repeated calls for an intent that already produced an order return
    /// that order without touching stock.
    pub fn complete(
        &self,
        ctx: &mut RequestContext<'_>,
        intent_id: &str,
        customer: &CustomerDetails,
    ) -> ShopResult<Order> {
        let started_at = Instant::now();
        if let Some(existing) = self.orders.find_order_by_payment_intent(intent_id)? {
            return Ok(replay(ctx, existing));
        }

        let intent = self.payments.retrieve_payment_intent(intent_id)?;
        let settings = self.settings.load_settings()?;
        let quote = self.quote_with(ctx, &settings)?;
        verify_intent(ctx, &intent, &quote)?;

        let mut order = build_order(&quote, customer);
        order.payment_intent_id = Some(intent.id.clone());
        order.validate().map_err(|err| ShopError::Validation(err.to_string()))?;

        // A concurrent completion of the same intent may win any step from
        // here on; its order is then returned instead of the error.
        let reserved = match self.reserve_all(&quote) {
            Ok(reserved) => reserved,
            Err(err) => return self.replay_or(ctx, &intent.id, err),
        };
        let order_id = match self.orders.create_order(&order) {
            Ok(id) => id,
            Err(RepoError::Conflict(reason)) => {
                self.release_all(&reserved);
                return self.replay_or(ctx, &intent.id, ShopError::validation(reason));
            }
            Err(err) => {
                self.release_all(&reserved);
                error!(
                    "event=checkout_complete module=checkout status=error duration_ms={} error_code=order_persist_failed error={err}",
                    started_at.elapsed().as_millis()
                );
                return Err(err.into());
            }
        };
        ctx.session.cart.clear();

        let stored = self
            .orders
            .get_order(&order_id)?
            .ok_or_else(|| ShopError::not_found("order", &order_id))?;
        self.send_confirmation(&stored, &settings);
        info!(
            "event=checkout_complete module=checkout status=ok order_id={} items={} duration_ms={}",
            stored.id,
            stored.item_count(),
            started_at.elapsed().as_millis()
        );
        Ok(stored)
    }

    /// Returns the order already created for `intent_id`, or `err` when none
    /// exists.
    fn replay_or(
        &self,
        ctx: &mut RequestContext<'_>,
        intent_id: &str,
        err: ShopError,
    ) -> ShopResult<Order> {
        match self.orders.find_order_by_payment_intent(intent_id)? {
            Some(existing) => Ok(replay(ctx, existing)),
            None => Err(err),
        }
    }

    fn quote_with(&self, ctx: &RequestContext<'_>, settings: &Settings) -> ShopResult<Quote> {
        let cart = &ctx.session.cart;
        if cart.is_empty() {
            return Err(ShopError::validation("your cart is empty"));
        }
        let currency = ctx.currency(settings);
        let lines = cart.priced_lines(self.products, &currency)?;
        if lines.len() != cart.lines().len() {
            return Err(ShopError::validation(
                "some items in your cart are no longer available",
            ));
        }
        let subtotal: Decimal = lines.iter().map(|line| line.subtotal).sum();
        let shipping = settings.shipping_for(subtotal);
        Ok(Quote {
            currency,
            lines,
            subtotal,
            shipping,
            total: subtotal + shipping,
        })
    }

    /// Reserves stock per product; undoes earlier reservations on failure.
    fn reserve_all(&self, quote: &Quote) -> ShopResult<Vec<(ProductId, u32)>> {
        let mut wanted: BTreeMap<ProductId, u32> = BTreeMap::new();
        for line in &quote.lines {
            let entry = wanted.entry(line.key.product_id).or_default();
            *entry = entry.checked_add(line.quantity).ok_or_else(|| {
                ShopError::validation(format!(
                    "quantity for product {} is too large for one order",
                    line.key.product_id
                ))
            })?;
        }

        let mut reserved = Vec::with_capacity(wanted.len());
        for (product_id, quantity) in wanted {
            let outcome = match self.products.reserve_stock(product_id, quantity) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.release_all(&reserved);
                    return Err(err.into());
                }
            };
            match outcome {
                StockReservation::Reserved { .. } => reserved.push((product_id, quantity)),
                StockReservation::Insufficient { available } => {
                    self.release_all(&reserved);
                    return Err(ShopError::validation(format!(
                        "insufficient stock for product {product_id}: requested {quantity}, available {available}"
                    )));
                }
                StockReservation::NotFound => {
                    self.release_all(&reserved);
                    return Err(ShopError::not_found("product", product_id));
                }
            }
        }
        Ok(reserved)
    }

    fn release_all(&self, reserved: &[(ProductId, u32)]) {
        for (product_id, quantity) in reserved {
            if let Err(err) = self.products.release_stock(*product_id, *quantity) {
                error!(
                    "event=stock_release module=checkout status=error product_id={product_id} quantity={quantity} error_code=release_failed error={err}"
                );
            }
        }
    }

    fn send_confirmation(&self, order: &Order, settings: &Settings) {
        let site = settings
            .site_name()
            .unwrap_or_else(|| "Angel Marketplace".to_string());
        let message = MailMessage {
            to: order.customer_email.clone(),
            subject: format!("{site}: order {} confirmed", order.id),
            html_body: confirmation_body(order, &site),
            reply_to: settings.site_email(),
        };
        if let Err(err) = self.mailer.send(&message) {
            warn!(
                "event=order_confirmation_mail module=checkout status=error order_id={} error_code=mail_failed error={err}",
                order.id
            );
        }
    }
}

fn replay(ctx: &mut RequestContext<'_>, existing: Order) -> Order {
    ctx.session.cart.clear();
    info!(
        "event=checkout_complete module=checkout status=ok order_id={} replay=true",
        existing.id
    );
    existing
}

fn session_metadata(ctx: &RequestContext<'_>, currency: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(METADATA_SESSION_ID.to_string(), ctx.session.id.to_string());
    metadata.insert(METADATA_CURRENCY.to_string(), currency.to_string());
    metadata
}

fn verify_intent(
    ctx: &RequestContext<'_>,
    intent: &PaymentIntent,
    quote: &Quote,
) -> ShopResult<()> {
    if !intent.succeeded() {
        return Err(ShopError::validation(format!(
            "payment has not completed (status: {})",
            intent.status
        )));
    }
    let owner = intent.metadata.get(METADATA_SESSION_ID);
    if owner.is_none_or(|owner| *owner != ctx.session.id.to_string()) {
        return Err(ShopError::validation(
            "payment does not belong to this session",
        ));
    }
    if intent.amount_minor != minor_units(quote.total)?
        || !intent.currency.eq_ignore_ascii_case(&quote.currency)
    {
        return Err(ShopError::validation(
            "payment amount does not match the cart total",
        ));
    }
    Ok(())
}

fn build_order(quote: &Quote, customer: &CustomerDetails) -> Order {
    let items = quote
        .lines
        .iter()
        .map(|line| {
            OrderItem::snapshot(
                line.key.product_id,
                line.name.clone(),
                line.unit_price,
                line.quantity,
            )
            .with_variant(line.key.size.clone(), line.key.color.clone())
        })
        .collect();
    let mut order = Order::from_items(
        customer.name.trim(),
        customer.email.trim(),
        quote.currency.clone(),
        items,
        quote.shipping,
    );
    order.customer_phone = customer.phone.clone();
    order.shipping_address = customer.shipping_address.clone();
    order.billing_address = customer.billing_address.clone();
    order.notes = customer.notes.clone();
    order.status = status::PROCESSING.to_string();
    order.payment_status = payment_status::PAID.to_string();
    order
}

fn minor_units(amount: Decimal) -> ShopResult<i64> {
    to_minor_units(amount)
        .ok_or_else(|| ShopError::validation(format!("amount {amount} is out of range")))
}

fn line_label(line: &PricedLine) -> String {
    let variant: Vec<&str> = [line.key.size.as_deref(), line.key.color.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if variant.is_empty() {
        line.name.clone()
    } else {
        format!("{} ({})", line.name, variant.join(", "))
    }
}

fn confirmation_body(order: &Order, site: &str) -> String {
    let rows: String = order
        .items
        .iter()
        .map(|item| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{} {}</td></tr>",
                escape_html(&item.name),
                item.quantity,
                item.subtotal,
                order.currency
            )
        })
        .collect();
    format!(
        "<h1>Thank you for your order</h1>\
         <p>Hi {}, your order <strong>{}</strong> from {} is confirmed.</p>\
         <table>{rows}</table>\
         <p>Shipping: {} {}<br>Total: {} {}</p>",
        escape_html(&order.customer_name),
        order.id,
        escape_html(site),
        order.shipping_cost,
        order.currency,
        order.total,
        order.currency,
    )
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{confirmation_body, escape_html, line_label};
    use crate::cart::{CartKey, CartOptions, PricedLine};
    use crate::model::order::{Order, OrderItem};
    use rust_decimal::Decimal;

    #[test]
    fn labels_include_variant_options() {
        let line = PricedLine {
            key: CartKey::new(1, &CartOptions::none().size("M").color("red")),
            name: "Tee".to_string(),
            unit_price: Decimal::new(1500, 2),
            quantity: 1,
            subtotal: Decimal::new(1500, 2),
        };
        assert_eq!(line_label(&line), "Tee (M, red)");
    }

    #[test]
    fn confirmation_mail_escapes_customer_text() {
        assert_eq!(escape_html("<b>&\"'"), "&lt;b&gt;&amp;&quot;&#39;");
        let mut order = Order::from_items(
            "<script>",
            "a@example.com",
            "GBP",
            vec![OrderItem::snapshot(1, "Mug", Decimal::new(1000, 2), 2)],
            Decimal::ZERO,
        );
        order.id = "AMP2026123456".to_string();
        let body = confirmation_body(&order, "Angel");
        assert!(body.contains("&lt;script&gt;"));
        assert!(body.contains("AMP2026123456"));
    }
}
