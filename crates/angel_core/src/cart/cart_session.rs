//! Per-session cart state and its change rules.

use super::{CartError, CartKey, CartLine, CartOptions};
use crate::model::product::{Product, ProductId};
use crate::repo::product_repo::ProductRepository;
use crate::repo::RepoResult;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A cart line resolved against live product data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub key: CartKey,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub subtotal: Decimal,
}

/// Ordered cart lines, unique by [`CartKey`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSession {
    lines: Vec<CartLine>,
}

impl CartSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn line(&self, key: &CartKey) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.key == *key)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Adds `quantity` of a product variant, merging with an equal key.
    ///
    /// Returns the resulting quantity of the affected line. On error the cart
    /// is unchanged.
    pub fn add(
        &mut self,
        products: &dyn ProductRepository,
        product_id: ProductId,
        quantity: i64,
        options: &CartOptions,
    ) -> Result<u32, CartError> {
        let quantity = positive_quantity(quantity)?;
        let product = available_product(products, product_id)?;
        let key = CartKey::new(product_id, options);
        check_options(&product, &key)?;

        let requested = units(self.quantity_for_product(product_id) + u64::from(quantity));
        ensure_stock(&product, requested)?;

        let current = self.line(&key).map_or(0, |line| line.quantity);
        let merged = current
            .checked_add(quantity)
            .ok_or(CartError::InvalidQuantity(requested))?;
        match self.lines.iter_mut().find(|line| line.key == key) {
            Some(line) => line.quantity = merged,
            None => self.lines.push(CartLine {
                key,
                quantity: merged,
            }),
        }
        Ok(merged)
    }

    /// Sets the quantity of a product's single cart line.
    ///
    /// `quantity <= 0` removes every line of the product. Returns `false`
    /// when the product is not in the cart.
    ///
    /// # Errors
    /// - `AmbiguousVariant` when the product has several variant lines and
    ///   `quantity > 0`; use [`CartSession::update_key`] instead.
    pub fn update(
        &mut self,
        products: &dyn ProductRepository,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<bool, CartError> {
        let keys: Vec<CartKey> = self
            .lines
            .iter()
            .filter(|line| line.key.product_id == product_id)
            .map(|line| line.key.clone())
            .collect();
        match keys.as_slice() {
            [] => Ok(false),
            _ if quantity <= 0 => Ok(self.remove(product_id) > 0),
            [key] => self.update_key(products, key, quantity),
            _ => Err(CartError::AmbiguousVariant(product_id)),
        }
    }

    /// Sets the quantity of one variant line; `quantity <= 0` removes it.
    pub fn update_key(
        &mut self,
        products: &dyn ProductRepository,
        key: &CartKey,
        quantity: i64,
    ) -> Result<bool, CartError> {
        if self.line(key).is_none() {
            return Ok(false);
        }
        if quantity <= 0 {
            return Ok(self.remove_key(key));
        }
        let quantity = positive_quantity(quantity)?;
        let product = available_product(products, key.product_id)?;

        let siblings: u64 = self
            .lines
            .iter()
            .filter(|line| line.key.product_id == key.product_id && line.key != *key)
            .map(|line| u64::from(line.quantity))
            .sum();
        ensure_stock(&product, units(siblings + u64::from(quantity)))?;

        if let Some(line) = self.lines.iter_mut().find(|line| line.key == *key) {
            line.quantity = quantity;
        }
        Ok(true)
    }

    /// Removes every variant line of a product; returns how many were removed.
    pub fn remove(&mut self, product_id: ProductId) -> usize {
        let before = self.lines.len();
        self.lines.retain(|line| line.key.product_id != product_id);
        before - self.lines.len()
    }

    /// Removes one variant line, leaving sibling variants untouched.
    pub fn remove_key(&mut self, key: &CartKey) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| line.key != *key);
        before != self.lines.len()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Units in the cart whose product can still be bought.
    ///
    /// Lines of missing or inactive products are left out, the same lines
    /// [`CartSession::total_value`] leaves out.
    pub fn total_count(&self, products: &dyn ProductRepository) -> RepoResult<u64> {
        let mut count = 0;
        for line in &self.lines {
            if products
                .get_product(line.key.product_id)?
                .is_some_and(|product| product.active)
            {
                count += u64::from(line.quantity);
            }
        }
        Ok(count)
    }

    /// Sum of quantities over every variant line of one product.
    pub fn quantity_for_product(&self, product_id: ProductId) -> u64 {
        self.lines
            .iter()
            .filter(|line| line.key.product_id == product_id)
            .map(|line| u64::from(line.quantity))
            .sum()
    }

    /// Resolves lines against live products at `currency`.
    ///
    /// Lines whose product is missing, inactive or unpriced in `currency`
    /// are left out.
    pub fn priced_lines(
        &self,
        products: &dyn ProductRepository,
        currency: &str,
    ) -> RepoResult<Vec<PricedLine>> {
        let mut priced = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let Some(product) = products.get_product(line.key.product_id)? else {
                continue;
            };
            if !product.active {
                continue;
            }
            let Some(unit_price) = product.price_in(currency) else {
                continue;
            };
            priced.push(PricedLine {
                key: line.key.clone(),
                name: product.name,
                unit_price,
                quantity: line.quantity,
                subtotal: unit_price * Decimal::from(line.quantity),
            });
        }
        Ok(priced)
    }

    /// Cart value at `currency` from live prices.
    pub fn total_value(
        &self,
        products: &dyn ProductRepository,
        currency: &str,
    ) -> RepoResult<Decimal> {
        Ok(self
            .priced_lines(products, currency)?
            .iter()
            .map(|line| line.subtotal)
            .sum())
    }
}

fn positive_quantity(quantity: i64) -> Result<u32, CartError> {
    match u32::try_from(quantity) {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(CartError::InvalidQuantity(quantity)),
    }
}

fn available_product(
    products: &dyn ProductRepository,
    product_id: ProductId,
) -> Result<Product, CartError> {
    match products.get_product(product_id)? {
        Some(product) if product.active => Ok(product),
        _ => Err(CartError::ProductUnavailable(product_id)),
    }
}

fn check_options(product: &Product, key: &CartKey) -> Result<(), CartError> {
    check_option(
        product.id,
        "size",
        &product.available_sizes,
        key.size.as_deref(),
    )?;
    check_option(
        product.id,
        "color",
        &product.available_colors,
        key.color.as_deref(),
    )
}

fn check_option(
    product_id: ProductId,
    option: &'static str,
    offered: &[String],
    chosen: Option<&str>,
) -> Result<(), CartError> {
    match chosen {
        None if offered.is_empty() => Ok(()),
        None => Err(CartError::MissingOption { product_id, option }),
        Some(value) if offered.iter().any(|candidate| candidate == value) => Ok(()),
        Some(value) => Err(CartError::InvalidOption {
            product_id,
            option,
            value: value.to_string(),
        }),
    }
}

fn units(quantity: u64) -> i64 {
    i64::try_from(quantity).unwrap_or(i64::MAX)
}

fn ensure_stock(product: &Product, requested: i64) -> Result<(), CartError> {
    if requested > product.stock {
        return Err(CartError::InsufficientStock {
            product_id: product.id,
            requested,
            available: product.stock,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::CartSession;
    use crate::cart::{CartError, CartKey, CartOptions};
    use crate::model::product::{Product, ProductPatch};
    use crate::repo::product_repo::{JsonProductRepository, ProductRepository};
    use crate::store::FileStore;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, JsonProductRepository, i64, i64) {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonProductRepository::new(FileStore::open(dir.path()).unwrap());

        let mut tee = Product::new("Tee", "tee");
        tee.active = true;
        tee.stock = 10;
        tee.available_sizes = vec!["M".to_string(), "L".to_string()];
        tee.prices = BTreeMap::from([("GBP".to_string(), Decimal::new(1500, 2))]);
        let tee_id = repo.create_product(&tee).unwrap();

        let mut mug = Product::new("Mug", "mug");
        mug.active = true;
        mug.stock = 5;
        mug.prices = BTreeMap::from([("GBP".to_string(), Decimal::new(1000, 2))]);
        let mug_id = repo.create_product(&mug).unwrap();

        (dir, repo, tee_id, mug_id)
    }

    #[test]
    fn equal_keys_merge_and_variants_stay_separate() {
        let (_dir, repo, tee, _) = fixture();
        let mut cart = CartSession::new();
        let medium = CartOptions::none().size("M");

        cart.add(&repo, tee, 1, &medium).unwrap();
        assert_eq!(cart.add(&repo, tee, 2, &medium).unwrap(), 3);
        assert_eq!(cart.lines().len(), 1);

        cart.add(&repo, tee, 1, &CartOptions::none().size("L"))
            .unwrap();
        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.quantity_for_product(tee), 4);

        assert!(cart.remove_key(&CartKey::new(tee, &medium)));
        assert_eq!(cart.total_count(&repo).unwrap(), 1);
    }

    #[test]
    fn clear_is_idempotent() {
        let (_dir, repo, _, mug) = fixture();
        let mut cart = CartSession::new();
        cart.add(&repo, mug, 2, &CartOptions::none()).unwrap();
        cart.clear();
        assert_eq!(cart.total_count(&repo).unwrap(), 0);
        cart.clear();
        assert_eq!(cart.total_count(&repo).unwrap(), 0);
        assert!(cart.is_empty());
    }

    #[test]
    fn stock_is_checked_across_variants() {
        let (_dir, repo, tee, mug) = fixture();
        let mut cart = CartSession::new();
        cart.add(&repo, tee, 6, &CartOptions::none().size("M"))
            .unwrap();
        let err = cart
            .add(&repo, tee, 5, &CartOptions::none().size("L"))
            .unwrap_err();
        assert!(matches!(
            err,
            CartError::InsufficientStock {
                requested: 11,
                available: 10,
                ..
            }
        ));
        assert_eq!(cart.quantity_for_product(tee), 6);

        cart.add(&repo, mug, 5, &CartOptions::none()).unwrap();
        assert!(cart.add(&repo, mug, 1, &CartOptions::none()).is_err());
        assert_eq!(cart.quantity_for_product(mug), 5);
    }

    #[test]
    fn invalid_input_is_rejected() {
        let (_dir, repo, tee, mug) = fixture();
        let mut cart = CartSession::new();
        assert!(matches!(
            cart.add(&repo, mug, 0, &CartOptions::none()),
            Err(CartError::InvalidQuantity(0))
        ));
        assert!(matches!(
            cart.add(&repo, 999, 1, &CartOptions::none()),
            Err(CartError::ProductUnavailable(999))
        ));
        assert!(matches!(
            cart.add(&repo, tee, 1, &CartOptions::none()),
            Err(CartError::MissingOption { option: "size", .. })
        ));
        assert!(matches!(
            cart.add(&repo, tee, 1, &CartOptions::none().size("XXL")),
            Err(CartError::InvalidOption { option: "size", .. })
        ));
        assert!(matches!(
            cart.add(&repo, mug, 1, &CartOptions::none().color("red")),
            Err(CartError::InvalidOption { option: "color", .. })
        ));
        assert!(cart.is_empty());
    }

    #[test]
    fn update_sets_or_removes() {
        let (_dir, repo, tee, mug) = fixture();
        let mut cart = CartSession::new();
        cart.add(&repo, mug, 1, &CartOptions::none()).unwrap();
        assert!(cart.update(&repo, mug, 4).unwrap());
        assert_eq!(cart.quantity_for_product(mug), 4);
        assert!(cart.update(&repo, mug, 6).is_err());
        assert!(cart.update(&repo, mug, 0).unwrap());
        assert!(cart.is_empty());
        assert!(!cart.update(&repo, mug, 1).unwrap());

        cart.add(&repo, tee, 1, &CartOptions::none().size("M"))
            .unwrap();
        cart.add(&repo, tee, 1, &CartOptions::none().size("L"))
            .unwrap();
        assert!(matches!(
            cart.update(&repo, tee, 3),
            Err(CartError::AmbiguousVariant(_))
        ));
        let large = CartKey::new(tee, &CartOptions::none().size("L"));
        assert!(cart.update_key(&repo, &large, 3).unwrap());
        assert_eq!(cart.quantity_for_product(tee), 4);
        assert_eq!(cart.remove(tee), 2);
    }

    #[test]
    fn totals_follow_live_prices_and_drop_inactive_products() {
        let (_dir, repo, tee, mug) = fixture();
        let mut cart = CartSession::new();
        cart.add(&repo, mug, 2, &CartOptions::none()).unwrap();
        cart.add(&repo, tee, 1, &CartOptions::none().size("M"))
            .unwrap();
        assert_eq!(
            cart.total_value(&repo, "GBP").unwrap(),
            Decimal::new(3500, 2)
        );
        assert_eq!(cart.total_value(&repo, "EUR").unwrap(), Decimal::ZERO);

        repo.update_product(
            mug,
            &ProductPatch::new().prices(BTreeMap::from([(
                "GBP".to_string(),
                Decimal::new(1200, 2),
            )])),
        )
        .unwrap();
        repo.update_product(tee, &ProductPatch::new().active(false))
            .unwrap();
        assert_eq!(
            cart.total_value(&repo, "gbp").unwrap(),
            Decimal::new(2400, 2)
        );
        assert_eq!(cart.total_count(&repo).unwrap(), 2);
        assert_eq!(cart.lines().len(), 2);
    }

    #[test]
    fn huge_stock_quantities_do_not_overflow() {
        let (_dir, repo, _, _) = fixture();
        let mut bulk = Product::new("Bulk", "bulk");
        bulk.active = true;
        bulk.stock = 7_000_000_000;
        bulk.available_sizes = vec!["S".to_string(), "L".to_string()];
        let bulk = repo.create_product(&bulk).unwrap();

        let mut cart = CartSession::new();
        let three_billion = 3_000_000_000;
        cart.add(&repo, bulk, three_billion, &CartOptions::none().size("S"))
            .unwrap();
        cart.add(&repo, bulk, three_billion, &CartOptions::none().size("L"))
            .unwrap();
        assert_eq!(cart.quantity_for_product(bulk), 6_000_000_000);
        assert_eq!(cart.total_count(&repo).unwrap(), 6_000_000_000);

        assert!(matches!(
            cart.add(&repo, bulk, three_billion, &CartOptions::none().size("S")),
            Err(CartError::InsufficientStock {
                requested: 9_000_000_000,
                ..
            })
        ));
    }
}
