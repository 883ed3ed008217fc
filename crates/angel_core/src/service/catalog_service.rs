//! Catalog use-case service.
//!
//! # Responsibility
//! - Serve public (active-only) and admin views of products and categories.
//! - Validate category hierarchy changes above the repository layer.
//!
//! # Invariants
//! - Public reads never return inactive products or categories.
//! - Category writes never introduce a parent cycle.
//! - Reads tolerate cycles already present in stored data.

use super::{ShopError, ShopResult};
use crate::model::category::{Category, CategoryId, CategoryPatch};
use crate::model::product::{Product, ProductId, ProductPatch};
use crate::repo::category_repo::CategoryRepository;
use crate::repo::product_repo::{ProductQuery, ProductRepository};
use crate::storage::Repositories;
use chrono::Utc;
use log::warn;
use std::collections::{BTreeMap, HashMap, HashSet};

pub const DEFAULT_PAGE_SIZE: usize = 12;
pub const MAX_PAGE_SIZE: usize = 100;

/// One page of an already-filtered listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number after clamping.
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn page_count(&self) -> usize {
        self.total.div_ceil(self.per_page)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.page_count()
    }
}

/// Slices `items` into a page. Page 0 is treated as page 1; `per_page` is
/// clamped to `1..=MAX_PAGE_SIZE`, with 0 meaning the default size.
pub fn paginate<T>(items: Vec<T>, page: usize, per_page: usize) -> Page<T> {
    let per_page = match per_page {
        0 => DEFAULT_PAGE_SIZE,
        value => value.min(MAX_PAGE_SIZE),
    };
    let page = page.max(1);
    let total = items.len();
    let items = items
        .into_iter()
        .skip((page - 1).saturating_mul(per_page))
        .take(per_page)
        .collect();
    Page {
        items,
        page,
        per_page,
        total,
    }
}

/// Category with its resolved children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryNode {
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

/// Builds a forest from flat categories.
///
/// Categories whose parent is absent from `categories` become roots. Nodes
/// only reachable through a parent cycle are left out.
pub fn build_category_tree(categories: Vec<Category>) -> Vec<CategoryNode> {
    let known: HashSet<CategoryId> = categories.iter().map(|category| category.id).collect();
    let total = categories.len();
    let mut roots = Vec::new();
    let mut children: HashMap<CategoryId, Vec<Category>> = HashMap::new();
    for category in categories {
        match category.parent_id.filter(|parent| known.contains(parent)) {
            Some(parent) => children.entry(parent).or_default().push(category),
            None => roots.push(category),
        }
    }

    let mut placed = 0;
    let forest = roots
        .into_iter()
        .map(|root| attach_children(root, &mut children, &mut placed))
        .collect();
    if placed < total {
        warn!(
            "event=category_tree module=catalog status=error error_code=cycle_detected skipped={}",
            total - placed
        );
    }
    forest
}

fn attach_children(
    category: Category,
    children: &mut HashMap<CategoryId, Vec<Category>>,
    placed: &mut usize,
) -> CategoryNode {
    *placed += 1;
    let direct = children.remove(&category.id).unwrap_or_default();
    let nodes = direct
        .into_iter()
        .map(|child| attach_children(child, children, placed))
        .collect();
    CategoryNode {
        category,
        children: nodes,
    }
}

/// Catalog service facade.
pub struct CatalogService<'a> {
    products: &'a dyn ProductRepository,
    categories: &'a dyn CategoryRepository,
}

impl<'a> CatalogService<'a> {
    pub fn new(repos: &'a Repositories<'_>) -> Self {
        Self::from_parts(repos.products.as_ref(), repos.categories.as_ref())
    }

    pub fn from_parts(
        products: &'a dyn ProductRepository,
        categories: &'a dyn CategoryRepository,
    ) -> Self {
        Self {
            products,
            categories,
        }
    }

    /// Active products, optionally limited to one category.
    pub fn list_products(&self, category_id: Option<CategoryId>) -> ShopResult<Vec<Product>> {
        let query = match category_id {
            Some(id) => ProductQuery::public().in_category(id),
            None => ProductQuery::public(),
        };
        Ok(self.products.list_products(&query)?)
    }

    /// Active featured products, at most `limit`.
    pub fn featured_products(&self, limit: usize) -> ShopResult<Vec<Product>> {
        let mut featured = self
            .products
            .list_products(&ProductQuery::public().featured())?;
        featured.truncate(limit);
        Ok(featured)
    }

    /// Active products matching `text` in name or description.
    ///
    /// Blank text matches nothing.
    pub fn search_products(&self, text: &str) -> ShopResult<Vec<Product>> {
        let query = ProductQuery::public().search(text);
        if query.is_blank_search() {
            return Ok(Vec::new());
        }
        Ok(self.products.list_products(&query)?)
    }

    /// Active product by id.
    pub fn product(&self, id: ProductId) -> ShopResult<Product> {
        self.products
            .get_product(id)?
            .filter(|product| product.active)
            .ok_or_else(|| ShopError::not_found("product", id))
    }

    /// Active product by slug.
    pub fn product_by_slug(&self, slug: &str) -> ShopResult<Product> {
        self.products
            .find_product_by_slug(slug)?
            .filter(|product| product.active)
            .ok_or_else(|| ShopError::not_found("product", slug))
    }

    pub fn admin_products(&self, query: &ProductQuery) -> ShopResult<Vec<Product>> {
        Ok(self.products.list_products(query)?)
    }

    /// Product by id regardless of `active`.
    pub fn admin_product(&self, id: ProductId) -> ShopResult<Product> {
        self.products
            .get_product(id)?
            .ok_or_else(|| ShopError::not_found("product", id))
    }

    pub fn create_product(&self, product: &Product) -> ShopResult<ProductId> {
        Ok(self.products.create_product(product)?)
    }

    /// Applies `patch` and stamps `updated_at`.
    pub fn update_product(&self, id: ProductId, patch: ProductPatch) -> ShopResult<()> {
        let patch = patch.touched_at(Utc::now());
        if !self.products.update_product(id, &patch)? {
            return Err(ShopError::not_found("product", id));
        }
        Ok(())
    }

    /// Hides a product from public reads; orders keep referencing it.
    pub fn deactivate_product(&self, id: ProductId) -> ShopResult<()> {
        self.update_product(id, ProductPatch::new().active(false))
    }

    pub fn delete_product(&self, id: ProductId) -> ShopResult<()> {
        if !self.products.delete_product(id)? {
            return Err(ShopError::not_found("product", id));
        }
        Ok(())
    }

    /// Active categories in display order.
    pub fn categories(&self) -> ShopResult<Vec<Category>> {
        Ok(self.categories.list_categories(true)?)
    }

    pub fn admin_categories(&self) -> ShopResult<Vec<Category>> {
        Ok(self.categories.list_categories(false)?)
    }

    pub fn category(&self, id: CategoryId) -> ShopResult<Category> {
        self.categories
            .get_category(id)?
            .filter(|category| category.active)
            .ok_or_else(|| ShopError::not_found("category", id))
    }

    /// Category forest. With `active_only`, inactive categories and their
    /// subtrees are hidden.
    pub fn category_tree(&self, active_only: bool) -> ShopResult<Vec<CategoryNode>> {
        let all = self.categories.list_categories(false)?;
        if !active_only {
            return Ok(build_category_tree(all));
        }
        let inactive: HashSet<CategoryId> = all
            .iter()
            .filter(|category| !category.active)
            .map(|category| category.id)
            .collect();
        let by_id: BTreeMap<CategoryId, Option<CategoryId>> = all
            .iter()
            .map(|category| (category.id, category.parent_id))
            .collect();
        let visible = all
            .into_iter()
            .filter(|category| !has_hidden_ancestor(category.id, &by_id, &inactive))
            .collect();
        Ok(build_category_tree(visible))
    }

    /// Breadcrumb from the root down to `id`.
    ///
    /// Stops early at a dangling parent or a parent cycle.
    pub fn category_path(&self, id: CategoryId) -> ShopResult<Vec<Category>> {
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if !visited.insert(current) {
                warn!(
                    "event=category_path module=catalog status=error error_code=cycle_detected category_id={id}"
                );
                break;
            }
            let Some(category) = self.categories.get_category(current)? else {
                if current == id {
                    return Err(ShopError::not_found("category", id));
                }
                break;
            };
            cursor = category.parent_id;
            path.push(category);
        }
        path.reverse();
        Ok(path)
    }

    pub fn create_category(&self, category: &Category) -> ShopResult<CategoryId> {
        if let Some(parent_id) = category.parent_id {
            self.ensure_parent_exists(parent_id)?;
        }
        Ok(self.categories.create_category(category)?)
    }

    /// Applies `patch`, rejecting parent changes that would form a cycle.
    pub fn update_category(&self, id: CategoryId, patch: CategoryPatch) -> ShopResult<()> {
        if let Some(Some(parent_id)) = patch.parent_id {
            self.ensure_parent_exists(parent_id)?;
            if self.would_create_cycle(id, parent_id)? {
                return Err(ShopError::validation(format!(
                    "category {id} cannot be placed under {parent_id}: parent cycle"
                )));
            }
        }
        let patch = patch.touched_at(Utc::now());
        if !self.categories.update_category(id, &patch)? {
            return Err(ShopError::not_found("category", id));
        }
        Ok(())
    }

    pub fn deactivate_category(&self, id: CategoryId) -> ShopResult<()> {
        self.update_category(id, CategoryPatch::new().active(false))
    }

    pub fn delete_category(&self, id: CategoryId) -> ShopResult<()> {
        if !self.categories.delete_category(id)? {
            return Err(ShopError::not_found("category", id));
        }
        Ok(())
    }

    fn ensure_parent_exists(&self, parent_id: CategoryId) -> ShopResult<()> {
        if self.categories.get_category(parent_id)?.is_none() {
            return Err(ShopError::validation(format!(
                "parent category {parent_id} does not exist"
            )));
        }
        Ok(())
    }

    fn would_create_cycle(
        &self,
        category_id: CategoryId,
        candidate_parent: CategoryId,
    ) -> ShopResult<bool> {
        let mut visited = HashSet::new();
        let mut cursor = Some(candidate_parent);
        while let Some(current) = cursor {
            if current == category_id {
                return Ok(true);
            }
            if !visited.insert(current) {
                return Ok(true);
            }
            cursor = self
                .categories
                .get_category(current)?
                .and_then(|category| category.parent_id);
        }
        Ok(false)
    }
}

fn has_hidden_ancestor(
    id: CategoryId,
    parents: &BTreeMap<CategoryId, Option<CategoryId>>,
    inactive: &HashSet<CategoryId>,
) -> bool {
    let mut visited = HashSet::new();
    let mut cursor = Some(id);
    while let Some(current) = cursor {
        if inactive.contains(&current) {
            return true;
        }
        if !visited.insert(current) {
            return false;
        }
        cursor = parents.get(&current).copied().flatten();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::{build_category_tree, paginate, CatalogService};
    use crate::model::category::{Category, CategoryPatch};
    use crate::model::product::{Product, ProductPatch};
    use crate::service::ShopError;
    use crate::storage::Storage;
    use rust_decimal::Decimal;

    fn category(id: i64, parent: Option<i64>) -> Category {
        let mut category = Category::new(format!("C{id}"), format!("c-{id}"));
        category.id = id;
        category.parent_id = parent;
        category
    }

    #[test]
    fn tree_nests_children_and_promotes_orphans() {
        let forest = build_category_tree(vec![
            category(1, None),
            category(2, Some(1)),
            category(3, Some(2)),
            category(4, Some(99)),
        ]);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].category.id, 1);
        assert_eq!(forest[0].children[0].children[0].category.id, 3);
        assert_eq!(forest[1].category.id, 4);
    }

    #[test]
    fn tree_skips_cyclic_nodes() {
        let forest = build_category_tree(vec![
            category(1, None),
            category(2, Some(3)),
            category(3, Some(2)),
            category(5, Some(5)),
        ]);
        assert_eq!(forest.len(), 1);
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn paginate_clamps_page_and_size() {
        let page = paginate((1..=25).collect::<Vec<_>>(), 0, 10);
        assert_eq!(page.page, 1);
        assert_eq!(page.items, (1..=10).collect::<Vec<_>>());
        assert_eq!(page.page_count(), 3);
        assert!(page.has_next());

        let last = paginate((1..=25).collect::<Vec<_>>(), 3, 10);
        assert_eq!(last.items, vec![21, 22, 23, 24, 25]);
        assert!(!last.has_next());

        assert!(paginate((1..=5).collect::<Vec<_>>(), 9, 0).items.is_empty());
    }

    #[test]
    fn public_reads_hide_inactive_products() {
        let storage = Storage::open_sqlite_in_memory().unwrap();
        let repos = storage.repositories().unwrap();
        let catalog = CatalogService::new(&repos);

        let mut mug = Product::new("Mug", "mug");
        mug.prices.insert("GBP".to_string(), Decimal::new(1000, 2));
        mug.stock = 3;
        mug.active = true;
        let id = catalog.create_product(&mug).unwrap();

        assert_eq!(catalog.product(id).unwrap().name, "Mug");
        catalog.deactivate_product(id).unwrap();
        assert!(matches!(
            catalog.product(id),
            Err(ShopError::NotFound { .. })
        ));
        assert!(catalog.list_products(None).unwrap().is_empty());
        assert!(!catalog.admin_product(id).unwrap().active);
        assert!(catalog.search_products("  ").unwrap().is_empty());
        assert!(matches!(
            catalog.update_product(999, ProductPatch::new().name("X")),
            Err(ShopError::NotFound { .. })
        ));
    }

    #[test]
    fn category_writes_reject_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open_json(dir.path()).unwrap();
        let repos = storage.repositories().unwrap();
        let catalog = CatalogService::new(&repos);

        let root = catalog.create_category(&Category::new("Root", "root")).unwrap();
        let mut child = Category::new("Child", "child");
        child.parent_id = Some(root);
        let child = catalog.create_category(&child).unwrap();

        let err = catalog
            .update_category(root, CategoryPatch::new().parent(Some(child)))
            .unwrap_err();
        assert!(matches!(err, ShopError::Validation(_)));

        let mut orphan = Category::new("Orphan", "orphan");
        orphan.parent_id = Some(404);
        assert!(matches!(
            catalog.create_category(&orphan),
            Err(ShopError::Validation(_))
        ));

        let path: Vec<_> = catalog
            .category_path(child)
            .unwrap()
            .into_iter()
            .map(|category| category.id)
            .collect();
        assert_eq!(path, vec![root, child]);
    }

    #[test]
    fn active_tree_hides_inactive_subtrees() {
        let storage = Storage::open_sqlite_in_memory().unwrap();
        let repos = storage.repositories().unwrap();
        let catalog = CatalogService::new(&repos);

        let root = catalog.create_category(&Category::new("Root", "root")).unwrap();
        let mut child = Category::new("Child", "child");
        child.parent_id = Some(root);
        catalog.create_category(&child).unwrap();
        catalog.deactivate_category(root).unwrap();

        assert!(catalog.category_tree(true).unwrap().is_empty());
        assert_eq!(catalog.category_tree(false).unwrap().len(), 1);
    }
}
