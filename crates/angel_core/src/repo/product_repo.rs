//! Product repository contract and implementations.
//!
//! # Responsibility
//! - Persist products with per-currency prices and variant options.
//! - Filter catalog reads by visibility, category, featured flag and text.
//! - Adjust stock atomically for checkout.
//!
//! # Invariants
//! - A blank search string matches nothing.
//! - `reserve_stock` never drives stock below zero, even under concurrency.
//! - `update_product` merges via [`ProductPatch::apply`] and re-validates.

use crate::model::category::CategoryId;
use crate::model::product::{Product, ProductId, ProductPatch};
use crate::model::ExtraFields;
use crate::repo::json_table::{JsonTable, Record};
use crate::repo::sql_support::{
    begin_immediate, bool_to_int, decimal_to_db, ensure_connection_ready, int_to_bool,
    parse_decimal, parse_timestamp, timestamp_to_db,
};
use crate::repo::RepoResult;
use crate::store::{FileStore, Outcome};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

/// Filters for [`ProductRepository::list_products`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductQuery {
    /// Only `active == true` rows. Every public read sets this.
    pub active_only: bool,
    pub category_id: Option<CategoryId>,
    pub featured_only: bool,
    /// Case-insensitive substring over name and description.
    pub search: Option<String>,
}

impl ProductQuery {
    /// Storefront view: active products only.
    pub fn public() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    /// Admin view: every product.
    pub fn admin() -> Self {
        Self::default()
    }

    pub fn in_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn featured(mut self) -> Self {
        self.featured_only = true;
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    /// Returns whether the query carries a search that can match nothing.
    pub fn is_blank_search(&self) -> bool {
        self.search
            .as_deref()
            .is_some_and(|text| text.trim().is_empty())
    }

    /// Evaluates every filter against `product`.
    pub fn matches(&self, product: &Product) -> bool {
        if self.active_only && !product.active {
            return false;
        }
        if self.featured_only && !product.featured {
            return false;
        }
        if let Some(category_id) = self.category_id {
            if product.category_id != Some(category_id) {
                return false;
            }
        }
        match self.search.as_deref() {
            None => true,
            Some(text) => {
                let needle = text.trim().to_lowercase();
                !needle.is_empty() && product.matches_text(&needle)
            }
        }
    }
}

/// Result of an atomic stock reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockReservation {
    Reserved { remaining: i64 },
    Insufficient { available: i64 },
    NotFound,
}

/// Backend-agnostic product persistence.
pub trait ProductRepository {
    /// Lists products in id order.
    fn list_products(&self, query: &ProductQuery) -> RepoResult<Vec<Product>>;
    fn get_product(&self, id: ProductId) -> RepoResult<Option<Product>>;
    fn find_product_by_slug(&self, slug: &str) -> RepoResult<Option<Product>>;
    /// Persists a new product; the input `id` is ignored.
    fn create_product(&self, product: &Product) -> RepoResult<ProductId>;
    fn update_product(&self, id: ProductId, patch: &ProductPatch) -> RepoResult<bool>;
    fn delete_product(&self, id: ProductId) -> RepoResult<bool>;
    /// Decrements stock by `quantity` only if enough is available.
    fn reserve_stock(&self, id: ProductId, quantity: u32) -> RepoResult<StockReservation>;
    /// Returns previously reserved stock.
    fn release_stock(&self, id: ProductId, quantity: u32) -> RepoResult<bool>;
}

impl Record for Product {
    type Id = ProductId;
    const DOCUMENT: &'static str = "products";

    fn record_id(&self) -> ProductId {
        self.id
    }

    fn assign_id(&mut self, id: ProductId) {
        self.id = id;
    }
}

fn prepare_new(product: &Product) -> Product {
    let mut record = product.clone();
    if record.created_at.is_none() {
        record.created_at = Some(Utc::now());
    }
    record
}

/// Products stored in `products.json`.
pub struct JsonProductRepository {
    table: JsonTable<Product>,
}

impl JsonProductRepository {
    pub fn new(store: FileStore) -> Self {
        Self {
            table: JsonTable::new(store),
        }
    }
}

impl ProductRepository for JsonProductRepository {
    fn list_products(&self, query: &ProductQuery) -> RepoResult<Vec<Product>> {
        if query.is_blank_search() {
            return Ok(Vec::new());
        }
        let mut products: Vec<Product> = self
            .table
            .all()?
            .into_iter()
            .filter(|product| query.matches(product))
            .collect();
        products.sort_by_key(|product| product.id);
        Ok(products)
    }

    fn get_product(&self, id: ProductId) -> RepoResult<Option<Product>> {
        self.table.find(&id)
    }

    fn find_product_by_slug(&self, slug: &str) -> RepoResult<Option<Product>> {
        Ok(self
            .table
            .all()?
            .into_iter()
            .find(|product| product.slug == slug))
    }

    fn create_product(&self, product: &Product) -> RepoResult<ProductId> {
        product.validate()?;
        self.table.insert_with_next_id(prepare_new(product))
    }

    fn update_product(&self, id: ProductId, patch: &ProductPatch) -> RepoResult<bool> {
        self.table.modify(&id, |product| {
            patch.apply(product);
            product.validate()?;
            Ok(())
        })
    }

    fn delete_product(&self, id: ProductId) -> RepoResult<bool> {
        self.table.remove(&id)
    }

    fn reserve_stock(&self, id: ProductId, quantity: u32) -> RepoResult<StockReservation> {
        let quantity = i64::from(quantity);
        self.table.mutate(|rows| {
            let Some(product) = rows.get_mut(&id) else {
                return Ok(Outcome::Unchanged(StockReservation::NotFound));
            };
            if product.stock < quantity {
                return Ok(Outcome::Unchanged(StockReservation::Insufficient {
                    available: product.stock,
                }));
            }
            product.stock -= quantity;
            Ok(Outcome::Changed(StockReservation::Reserved {
                remaining: product.stock,
            }))
        })
    }

    fn release_stock(&self, id: ProductId, quantity: u32) -> RepoResult<bool> {
        self.table.mutate(|rows| match rows.get_mut(&id) {
            Some(product) => {
                product.stock += i64::from(quantity);
                Ok(Outcome::Changed(true))
            }
            None => Ok(Outcome::Unchanged(false)),
        })
    }
}

const PRODUCT_SELECT_SQL: &str = "SELECT
    id,
    slug,
    name,
    description,
    active,
    category_id,
    stock,
    legacy_price,
    featured,
    image,
    created_at,
    updated_at
FROM products";

/// SQLite-backed product repository.
pub struct SqliteProductRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteProductRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(
            conn,
            &["products", "product_prices", "product_sizes", "product_colors"],
        )?;
        Ok(Self { conn })
    }
}

impl ProductRepository for SqliteProductRepository<'_> {
    fn list_products(&self, query: &ProductQuery) -> RepoResult<Vec<Product>> {
        if query.is_blank_search() {
            return Ok(Vec::new());
        }

        let mut sql = format!("{PRODUCT_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if query.active_only {
            sql.push_str(" AND active = 1");
        }
        if query.featured_only {
            sql.push_str(" AND featured = 1");
        }
        if let Some(category_id) = query.category_id {
            sql.push_str(" AND category_id = ?");
            bind_values.push(Value::Integer(category_id));
        }
        sql.push_str(" ORDER BY id ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut products = Vec::new();
        while let Some(row) = rows.next()? {
            products.push(parse_product_row(row)?);
        }

        let mut matched = Vec::with_capacity(products.len());
        for mut product in products {
            // Text search runs in Rust so both backends lowercase identically.
            if query.matches(&product) {
                load_product_children(self.conn, &mut product)?;
                matched.push(product);
            }
        }
        Ok(matched)
    }

    fn get_product(&self, id: ProductId) -> RepoResult<Option<Product>> {
        load_product(self.conn, id)
    }

    fn find_product_by_slug(&self, slug: &str) -> RepoResult<Option<Product>> {
        let found = self
            .conn
            .query_row(
                &format!("{PRODUCT_SELECT_SQL} WHERE slug = ?1 ORDER BY id ASC LIMIT 1;"),
                [slug],
                |row| Ok(parse_product_row(row)),
            )
            .optional()?;
        match found {
            Some(product) => {
                let mut product = product?;
                load_product_children(self.conn, &mut product)?;
                Ok(Some(product))
            }
            None => Ok(None),
        }
    }

    fn create_product(&self, product: &Product) -> RepoResult<ProductId> {
        product.validate()?;
        let record = prepare_new(product);

        let tx = begin_immediate(self.conn)?;
        tx.execute(
            "INSERT INTO products (
                slug,
                name,
                description,
                active,
                category_id,
                stock,
                legacy_price,
                featured,
                image,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                record.slug.as_str(),
                record.name.as_str(),
                record.description.as_str(),
                bool_to_int(record.active),
                record.category_id,
                record.stock,
                record.price.map(decimal_to_db),
                bool_to_int(record.featured),
                record.image.as_deref(),
                timestamp_to_db(record.created_at),
                timestamp_to_db(record.updated_at),
            ],
        )?;
        let id = tx.last_insert_rowid();
        write_product_children(&tx, id, &record)?;
        tx.commit()?;
        Ok(id)
    }

    fn update_product(&self, id: ProductId, patch: &ProductPatch) -> RepoResult<bool> {
        let tx = begin_immediate(self.conn)?;
        let Some(mut product) = load_product(&tx, id)? else {
            return Ok(false);
        };
        patch.apply(&mut product);
        product.validate()?;

        tx.execute(
            "UPDATE products
             SET
                slug = ?1,
                name = ?2,
                description = ?3,
                active = ?4,
                category_id = ?5,
                stock = ?6,
                legacy_price = ?7,
                featured = ?8,
                image = ?9,
                created_at = ?10,
                updated_at = ?11
             WHERE id = ?12;",
            params![
                product.slug.as_str(),
                product.name.as_str(),
                product.description.as_str(),
                bool_to_int(product.active),
                product.category_id,
                product.stock,
                product.price.map(decimal_to_db),
                bool_to_int(product.featured),
                product.image.as_deref(),
                timestamp_to_db(product.created_at),
                timestamp_to_db(product.updated_at),
                id,
            ],
        )?;
        write_product_children(&tx, id, &product)?;
        tx.commit()?;
        Ok(true)
    }

    fn delete_product(&self, id: ProductId) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM products WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    fn reserve_stock(&self, id: ProductId, quantity: u32) -> RepoResult<StockReservation> {
        let quantity = i64::from(quantity);
        let tx = begin_immediate(self.conn)?;
        let changed = tx.execute(
            "UPDATE products SET stock = stock - ?2 WHERE id = ?1 AND stock >= ?2;",
            params![id, quantity],
        )?;
        let stock: Option<i64> = tx
            .query_row("SELECT stock FROM products WHERE id = ?1;", [id], |row| {
                row.get(0)
            })
            .optional()?;
        tx.commit()?;

        Ok(match (changed, stock) {
            (_, None) => StockReservation::NotFound,
            (0, Some(available)) => StockReservation::Insufficient { available },
            (_, Some(remaining)) => StockReservation::Reserved { remaining },
        })
    }

    fn release_stock(&self, id: ProductId, quantity: u32) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE products SET stock = stock + ?2 WHERE id = ?1;",
            params![id, i64::from(quantity)],
        )?;
        Ok(changed > 0)
    }
}

fn load_product(conn: &Connection, id: ProductId) -> RepoResult<Option<Product>> {
    let found = conn
        .query_row(
            &format!("{PRODUCT_SELECT_SQL} WHERE id = ?1;"),
            [id],
            |row| Ok(parse_product_row(row)),
        )
        .optional()?;
    match found {
        Some(product) => {
            let mut product = product?;
            load_product_children(conn, &mut product)?;
            Ok(Some(product))
        }
        None => Ok(None),
    }
}

fn parse_product_row(row: &Row<'_>) -> RepoResult<Product> {
    let legacy_price = match row.get::<_, Option<String>>("legacy_price")? {
        Some(text) => Some(parse_decimal(&text, "products.legacy_price")?),
        None => None,
    };

    Ok(Product {
        id: row.get("id")?,
        slug: row.get("slug")?,
        name: row.get("name")?,
        description: row.get("description")?,
        active: int_to_bool(row.get("active")?, "products.active")?,
        category_id: row.get("category_id")?,
        stock: row.get("stock")?,
        prices: BTreeMap::new(),
        price: legacy_price,
        available_sizes: Vec::new(),
        available_colors: Vec::new(),
        featured: int_to_bool(row.get("featured")?, "products.featured")?,
        image: row.get("image")?,
        created_at: parse_timestamp(row.get("created_at")?, "products.created_at")?,
        updated_at: parse_timestamp(row.get("updated_at")?, "products.updated_at")?,
        extra: ExtraFields::new(),
    })
}

fn load_product_children(conn: &Connection, product: &mut Product) -> RepoResult<()> {
    let mut stmt = conn.prepare(
        "SELECT currency, amount
         FROM product_prices
         WHERE product_id = ?1
         ORDER BY currency ASC;",
    )?;
    let mut rows = stmt.query([product.id])?;
    while let Some(row) = rows.next()? {
        let currency: String = row.get(0)?;
        let amount: String = row.get(1)?;
        product
            .prices
            .insert(currency, parse_decimal(&amount, "product_prices.amount")?);
    }

    product.available_sizes = load_ordered_values(conn, "product_sizes", "size", product.id)?;
    product.available_colors = load_ordered_values(conn, "product_colors", "color", product.id)?;
    Ok(())
}

fn load_ordered_values(
    conn: &Connection,
    table: &str,
    column: &str,
    product_id: ProductId,
) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column} FROM {table} WHERE product_id = ?1 ORDER BY position ASC;"
    ))?;
    let values = stmt
        .query_map([product_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(values)
}

fn write_product_children(
    conn: &Connection,
    product_id: ProductId,
    product: &Product,
) -> RepoResult<()> {
    conn.execute(
        "DELETE FROM product_prices WHERE product_id = ?1;",
        [product_id],
    )?;
    for (currency, amount) in &product.prices {
        conn.execute(
            "INSERT INTO product_prices (product_id, currency, amount) VALUES (?1, ?2, ?3);",
            params![product_id, currency.as_str(), decimal_to_db(*amount)],
        )?;
    }

    write_ordered_values(conn, "product_sizes", "size", product_id, &product.available_sizes)?;
    write_ordered_values(
        conn,
        "product_colors",
        "color",
        product_id,
        &product.available_colors,
    )
}

fn write_ordered_values(
    conn: &Connection,
    table: &str,
    column: &str,
    product_id: ProductId,
    values: &[String],
) -> RepoResult<()> {
    conn.execute(
        &format!("DELETE FROM {table} WHERE product_id = ?1;"),
        [product_id],
    )?;
    for (position, value) in values.iter().enumerate() {
        conn.execute(
            &format!("INSERT INTO {table} (product_id, position, {column}) VALUES (?1, ?2, ?3);"),
            params![product_id, position as i64, value.as_str()],
        )?;
    }
    Ok(())
}
