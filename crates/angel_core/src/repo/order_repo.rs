//! Order repository contract and implementations.
//!
//! # Responsibility
//! - Persist orders with their item snapshots and addresses.
//! - Assign unique human-readable order references.
//!
//! # Invariants
//! - Items and totals never change after create.
//! - Listing order is newest first on both backends.
//! - An order reference is unique; generation retries on collision.
//! - At most one order carries a given payment intent id; a second create
//!   for the same intent is a `Conflict`.

use crate::model::order::{generate_order_id, Address, Order, OrderId, OrderItem, OrderPatch};
use crate::model::ExtraFields;
use crate::repo::json_table::{JsonTable, Record};
use crate::repo::sql_support::{
    begin_immediate, decimal_to_db, ensure_connection_ready, parse_decimal, parse_timestamp,
    timestamp_to_db,
};
use crate::repo::{RepoError, RepoResult};
use crate::store::{FileStore, Outcome};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::cmp::Reverse;

/// Attempts before giving up on a fresh order reference.
pub const ORDER_ID_ATTEMPTS: usize = 10;

/// Filters for [`OrderRepository::list_orders`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderQuery {
    pub status: Option<String>,
    pub payment_status: Option<String>,
    /// Case-insensitive exact match.
    pub customer_email: Option<String>,
}

impl OrderQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn for_customer(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    fn matches(&self, order: &Order) -> bool {
        self.status
            .as_deref()
            .is_none_or(|status| order.status == status)
            && self
                .payment_status
                .as_deref()
                .is_none_or(|status| order.payment_status == status)
            && self
                .customer_email
                .as_deref()
                .is_none_or(|email| order.customer_email.eq_ignore_ascii_case(email.trim()))
    }
}

pub trait OrderRepository {
    fn list_orders(&self, query: &OrderQuery) -> RepoResult<Vec<Order>>;
    fn get_order(&self, id: &str) -> RepoResult<Option<Order>>;
    fn find_order_by_payment_intent(&self, intent_id: &str) -> RepoResult<Option<Order>>;
    /// Persists a new order.
    ///
    /// An empty `order.id` asks the repository to generate a reference; a
    /// non-empty one is kept and must be unused.
    /// A `payment_intent_id` already attached to another order is rejected
    /// with [`RepoError::Conflict`].
    fn create_order(&self, order: &Order) -> RepoResult<OrderId>;
    fn update_order(&self, id: &str, patch: &OrderPatch) -> RepoResult<bool>;
    fn delete_order(&self, id: &str) -> RepoResult<bool>;
}

impl Record for Order {
    type Id = OrderId;
    const DOCUMENT: &'static str = "orders";

    fn record_id(&self) -> OrderId {
        self.id.clone()
    }

    fn assign_id(&mut self, id: OrderId) {
        self.id = id;
    }
}

/// Picks an id for `order`, consulting `taken` for collisions.
fn choose_order_id(
    order: &Order,
    now: DateTime<Utc>,
    mut taken: impl FnMut(&str) -> RepoResult<bool>,
) -> RepoResult<OrderId> {
    let requested = order.id.trim();
    if !requested.is_empty() {
        if taken(requested)? {
            return Err(RepoError::Conflict(format!(
                "order `{requested}` already exists"
            )));
        }
        return Ok(requested.to_string());
    }

    let mut rng = rand::rng();
    for _ in 0..ORDER_ID_ATTEMPTS {
        let candidate = generate_order_id(now, &mut rng);
        if !taken(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(RepoError::Conflict(format!(
        "no free order reference after {ORDER_ID_ATTEMPTS} attempts"
    )))
}

fn intent_conflict(intent_id: &str) -> RepoError {
    RepoError::Conflict(format!("payment intent `{intent_id}` already has an order"))
}

fn sort_newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| {
        (Reverse(a.created_at), Reverse(&a.id)).cmp(&(Reverse(b.created_at), Reverse(&b.id)))
    });
}

pub struct JsonOrderRepository {
    table: JsonTable<Order>,
}

impl JsonOrderRepository {
    pub fn new(store: FileStore) -> Self {
        Self {
            table: JsonTable::new(store),
        }
    }
}

impl OrderRepository for JsonOrderRepository {
    fn list_orders(&self, query: &OrderQuery) -> RepoResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .table
            .all()?
            .into_iter()
            .filter(|order| query.matches(order))
            .collect();
        sort_newest_first(&mut orders);
        Ok(orders)
    }

    fn get_order(&self, id: &str) -> RepoResult<Option<Order>> {
        self.table.find(&id.to_string())
    }

    fn find_order_by_payment_intent(&self, intent_id: &str) -> RepoResult<Option<Order>> {
        Ok(self
            .table
            .all()?
            .into_iter()
            .find(|order| order.payment_intent_id.as_deref() == Some(intent_id)))
    }

    fn create_order(&self, order: &Order) -> RepoResult<OrderId> {
        order.validate()?;
        let now = Utc::now();
        self.table.mutate(|rows| {
            if let Some(intent_id) = order.payment_intent_id.as_deref() {
                if rows
                    .iter()
                    .any(|row| row.payment_intent_id.as_deref() == Some(intent_id))
                {
                    return Err(intent_conflict(intent_id));
                }
            }
            let id = choose_order_id(order, now, |candidate| {
                Ok(rows.contains(&candidate.to_string()))
            })?;
            let mut record = order.clone();
            record.id = id.clone();
            record.created_at.get_or_insert(now);
            rows.push(record);
            Ok(Outcome::Changed(id))
        })
    }

    fn update_order(&self, id: &str, patch: &OrderPatch) -> RepoResult<bool> {
        self.table.modify(&id.to_string(), |order| {
            patch.apply(order);
            order.validate()?;
            Ok(())
        })
    }

    fn delete_order(&self, id: &str) -> RepoResult<bool> {
        self.table.remove(&id.to_string())
    }
}

const ORDER_SELECT_SQL: &str = "SELECT
    id,
    customer_name,
    customer_email,
    customer_phone,
    currency,
    subtotal,
    shipping_cost,
    total,
    status,
    payment_status,
    payment_intent_id,
    notes,
    created_at,
    updated_at
FROM orders";

pub struct SqliteOrderRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOrderRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["orders", "order_items", "order_addresses"])?;
        Ok(Self { conn })
    }

    fn query_orders(&self, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<Order>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut orders = Vec::new();
        while let Some(row) = rows.next()? {
            orders.push(parse_order_row(row)?);
        }
        for order in &mut orders {
            load_order_children(self.conn, order)?;
        }
        Ok(orders)
    }
}

impl OrderRepository for SqliteOrderRepository<'_> {
    fn list_orders(&self, query: &OrderQuery) -> RepoResult<Vec<Order>> {
        let mut sql = format!("{ORDER_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(status) = &query.status {
            sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.clone()));
        }
        if let Some(status) = &query.payment_status {
            sql.push_str(" AND payment_status = ?");
            bind_values.push(Value::Text(status.clone()));
        }
        if let Some(email) = &query.customer_email {
            sql.push_str(" AND customer_email = ? COLLATE NOCASE");
            bind_values.push(Value::Text(email.trim().to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC;");

        self.query_orders(&sql, bind_values)
    }

    fn get_order(&self, id: &str) -> RepoResult<Option<Order>> {
        load_order(self.conn, id)
    }

    fn find_order_by_payment_intent(&self, intent_id: &str) -> RepoResult<Option<Order>> {
        let orders = self.query_orders(
            &format!(
                "{ORDER_SELECT_SQL} WHERE payment_intent_id = ? ORDER BY seq ASC LIMIT 1;"
            ),
            vec![Value::Text(intent_id.to_string())],
        )?;
        Ok(orders.into_iter().next())
    }

    fn create_order(&self, order: &Order) -> RepoResult<OrderId> {
        order.validate()?;
        let now = Utc::now();
        let tx = begin_immediate(self.conn)?;

        if let Some(intent_id) = order.payment_intent_id.as_deref() {
            let exists: i64 = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM orders WHERE payment_intent_id = ?1);",
                [intent_id],
                |row| row.get(0),
            )?;
            if exists == 1 {
                return Err(intent_conflict(intent_id));
            }
        }

        let id = choose_order_id(order, now, |candidate| {
            let exists: i64 = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM orders WHERE id = ?1);",
                [candidate],
                |row| row.get(0),
            )?;
            Ok(exists == 1)
        })?;
        let created_at = order.created_at.unwrap_or(now);

        tx.execute(
            "INSERT INTO orders (
                id,
                customer_name,
                customer_email,
                customer_phone,
                currency,
                subtotal,
                shipping_cost,
                total,
                status,
                payment_status,
                payment_intent_id,
                notes,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14);",
            params![
                id.as_str(),
                order.customer_name.as_str(),
                order.customer_email.as_str(),
                order.customer_phone.as_deref(),
                order.currency.as_str(),
                decimal_to_db(order.subtotal),
                decimal_to_db(order.shipping_cost),
                decimal_to_db(order.total),
                order.status.as_str(),
                order.payment_status.as_str(),
                order.payment_intent_id.as_deref(),
                order.notes.as_deref(),
                timestamp_to_db(Some(created_at)),
                timestamp_to_db(order.updated_at),
            ],
        )?;

        for (position, item) in order.items.iter().enumerate() {
            tx.execute(
                "INSERT INTO order_items (
                    order_id,
                    position,
                    product_id,
                    name,
                    price,
                    quantity,
                    size,
                    color,
                    subtotal
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
                params![
                    id.as_str(),
                    position as i64,
                    item.product_id,
                    item.name.as_str(),
                    decimal_to_db(item.price),
                    i64::from(item.quantity),
                    item.size.as_deref(),
                    item.color.as_deref(),
                    decimal_to_db(item.subtotal),
                ],
            )?;
        }
        write_addresses(&tx, &id, &order.shipping_address, order.billing_address.as_ref())?;

        tx.commit()?;
        Ok(id)
    }

    fn update_order(&self, id: &str, patch: &OrderPatch) -> RepoResult<bool> {
        let tx = begin_immediate(self.conn)?;
        let Some(mut order) = load_order(&tx, id)? else {
            return Ok(false);
        };
        patch.apply(&mut order);
        order.validate()?;

        tx.execute(
            "UPDATE orders
             SET
                customer_phone = ?1,
                status = ?2,
                payment_status = ?3,
                payment_intent_id = ?4,
                notes = ?5,
                updated_at = ?6
             WHERE id = ?7;",
            params![
                order.customer_phone.as_deref(),
                order.status.as_str(),
                order.payment_status.as_str(),
                order.payment_intent_id.as_deref(),
                order.notes.as_deref(),
                timestamp_to_db(order.updated_at),
                id,
            ],
        )?;
        write_addresses(&tx, id, &order.shipping_address, order.billing_address.as_ref())?;
        tx.commit()?;
        Ok(true)
    }

    fn delete_order(&self, id: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM orders WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }
}

fn load_order(conn: &Connection, id: &str) -> RepoResult<Option<Order>> {
    let found = conn
        .query_row(
            &format!("{ORDER_SELECT_SQL} WHERE id = ?1;"),
            [id],
            |row| Ok(parse_order_row(row)),
        )
        .optional()?
        .transpose()?;
    match found {
        Some(mut order) => {
            load_order_children(conn, &mut order)?;
            Ok(Some(order))
        }
        None => Ok(None),
    }
}

fn parse_order_row(row: &Row<'_>) -> RepoResult<Order> {
    let subtotal: String = row.get("subtotal")?;
    let shipping_cost: String = row.get("shipping_cost")?;
    let total: String = row.get("total")?;

    Ok(Order {
        id: row.get("id")?,
        customer_name: row.get("customer_name")?,
        customer_email: row.get("customer_email")?,
        customer_phone: row.get("customer_phone")?,
        shipping_address: Address::default(),
        billing_address: None,
        items: Vec::new(),
        currency: row.get("currency")?,
        subtotal: parse_decimal(&subtotal, "orders.subtotal")?,
        shipping_cost: parse_decimal(&shipping_cost, "orders.shipping_cost")?,
        total: parse_decimal(&total, "orders.total")?,
        status: row.get("status")?,
        payment_status: row.get("payment_status")?,
        payment_intent_id: row.get("payment_intent_id")?,
        notes: row.get("notes")?,
        created_at: parse_timestamp(row.get("created_at")?, "orders.created_at")?,
        updated_at: parse_timestamp(row.get("updated_at")?, "orders.updated_at")?,
        extra: ExtraFields::new(),
    })
}

fn load_order_children(conn: &Connection, order: &mut Order) -> RepoResult<()> {
    let mut stmt = conn.prepare(
        "SELECT product_id, name, price, quantity, size, color, subtotal
         FROM order_items
         WHERE order_id = ?1
         ORDER BY position ASC;",
    )?;
    let mut rows = stmt.query([order.id.as_str()])?;
    while let Some(row) = rows.next()? {
        let price: String = row.get("price")?;
        let subtotal: String = row.get("subtotal")?;
        let quantity: i64 = row.get("quantity")?;
        order.items.push(OrderItem {
            product_id: row.get("product_id")?,
            name: row.get("name")?,
            price: parse_decimal(&price, "order_items.price")?,
            quantity: u32::try_from(quantity).map_err(|_| {
                RepoError::InvalidData(format!(
                    "invalid quantity `{quantity}` in order_items.quantity"
                ))
            })?,
            size: row.get("size")?,
            color: row.get("color")?,
            subtotal: parse_decimal(&subtotal, "order_items.subtotal")?,
            extra: ExtraFields::new(),
        });
    }

    let mut stmt = conn.prepare(
        "SELECT kind, line1, line2, city, region, postcode, country
         FROM order_addresses
         WHERE order_id = ?1;",
    )?;
    let mut rows = stmt.query([order.id.as_str()])?;
    while let Some(row) = rows.next()? {
        let kind: String = row.get("kind")?;
        let address = Address {
            line1: row.get("line1")?,
            line2: row.get("line2")?,
            city: row.get("city")?,
            region: row.get("region")?,
            postcode: row.get("postcode")?,
            country: row.get("country")?,
        };
        match kind.as_str() {
            "shipping" => order.shipping_address = address,
            "billing" => order.billing_address = Some(address),
            other => {
                return Err(RepoError::InvalidData(format!(
                    "invalid address kind `{other}` in order_addresses.kind"
                )));
            }
        }
    }
    Ok(())
}

fn write_addresses(
    conn: &Connection,
    order_id: &str,
    shipping: &Address,
    billing: Option<&Address>,
) -> RepoResult<()> {
    conn.execute(
        "DELETE FROM order_addresses WHERE order_id = ?1;",
        [order_id],
    )?;
    let addresses = std::iter::once(("shipping", shipping))
        .chain(billing.map(|address| ("billing", address)));
    for (kind, address) in addresses {
        conn.execute(
            "INSERT INTO order_addresses (
                order_id,
                kind,
                line1,
                line2,
                city,
                region,
                postcode,
                country
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                order_id,
                kind,
                address.line1.as_str(),
                address.line2.as_deref(),
                address.city.as_str(),
                address.region.as_deref(),
                address.postcode.as_str(),
                address.country.as_str(),
            ],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{JsonOrderRepository, OrderQuery, OrderRepository, SqliteOrderRepository};
    use crate::db::open_db_in_memory;
    use crate::model::order::{status, Address, Order, OrderItem, OrderPatch, ORDER_ID_PREFIX};
    use crate::repo::RepoError;
    use crate::store::FileStore;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn order(email: &str) -> Order {
        let items = vec![
            OrderItem::snapshot(1, "Mug", Decimal::new(1000, 2), 2),
            OrderItem::snapshot(2, "Tee", Decimal::new(1500, 2), 1)
                .with_variant(Some("M".to_string()), None),
        ];
        let mut order = Order::from_items("Ada", email, "GBP", items, Decimal::new(395, 2));
        order.shipping_address = Address {
            line1: "1 High St".to_string(),
            city: "Leeds".to_string(),
            postcode: "LS1 1AA".to_string(),
            country: "GB".to_string(),
            ..Address::default()
        };
        order
    }

    fn exercise(repo: &dyn OrderRepository) {
        let base = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let mut first = order("ada@example.com");
        first.created_at = Some(base);
        first.payment_intent_id = Some("pi_1".to_string());
        let first_id = repo.create_order(&first).unwrap();
        assert!(first_id.starts_with(ORDER_ID_PREFIX));
        assert_eq!(first_id.len(), ORDER_ID_PREFIX.len() + 4 + 6);

        let mut second = order("bob@example.com");
        second.created_at = Some(base + Duration::minutes(5));
        let second_id = repo.create_order(&second).unwrap();

        let stored = repo.get_order(&first_id).unwrap().unwrap();
        assert_eq!(stored.items, first.items);
        assert_eq!(stored.total, Decimal::new(3895, 2));
        assert_eq!(stored.shipping_address, first.shipping_address);
        assert_eq!(stored.billing_address, None);

        let listed: Vec<_> = repo
            .list_orders(&OrderQuery::all())
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(listed, vec![second_id.clone(), first_id.clone()]);

        let mine = repo
            .list_orders(&OrderQuery::all().for_customer("ADA@example.com"))
            .unwrap();
        assert_eq!(mine.len(), 1);

        assert_eq!(
            repo.find_order_by_payment_intent("pi_1")
                .unwrap()
                .map(|o| o.id),
            Some(first_id.clone())
        );
        assert!(repo.find_order_by_payment_intent("pi_x").unwrap().is_none());

        assert!(repo
            .update_order(&first_id, &OrderPatch::new().status(status::SHIPPED))
            .unwrap());
        let shipped = repo
            .list_orders(&OrderQuery::all().with_status(status::SHIPPED))
            .unwrap();
        assert_eq!(shipped.len(), 1);
        assert_eq!(shipped[0].items, first.items);

        let mut same_intent = order("ada@example.com");
        same_intent.payment_intent_id = Some("pi_1".to_string());
        assert!(matches!(
            repo.create_order(&same_intent),
            Err(RepoError::Conflict(_))
        ));
        assert_eq!(
            repo.list_orders(&OrderQuery::all().for_customer("ada@example.com"))
                .unwrap()
                .len(),
            1
        );

        let mut duplicate = order("ada@example.com");
        duplicate.id = first_id.clone();
        assert!(matches!(
            repo.create_order(&duplicate),
            Err(RepoError::Conflict(_))
        ));

        assert!(repo.delete_order(&second_id).unwrap());
        assert!(!repo.delete_order(&second_id).unwrap());
        assert!(!repo
            .update_order(&second_id, &OrderPatch::new().status(status::CANCELLED))
            .unwrap());
    }

    #[test]
    fn json_repository_round_trips_orders() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&JsonOrderRepository::new(FileStore::open(dir.path()).unwrap()));
    }

    #[test]
    fn sqlite_repository_round_trips_orders() {
        let conn = open_db_in_memory().unwrap();
        exercise(&SqliteOrderRepository::try_new(&conn).unwrap());
    }

    #[test]
    fn invalid_order_is_rejected_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonOrderRepository::new(FileStore::open(dir.path()).unwrap());
        let mut bad = order("not-an-email");
        bad.items.clear();
        assert!(matches!(
            repo.create_order(&bad),
            Err(RepoError::Validation(_))
        ));
        assert!(repo.list_orders(&OrderQuery::all()).unwrap().is_empty());
    }
}
