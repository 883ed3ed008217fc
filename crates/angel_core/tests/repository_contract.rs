use angel_core::model::ad::{Ad, AdPatch};
use angel_core::model::category::{Category, CategoryPatch};
use angel_core::model::order::{Order, OrderItem};
use angel_core::model::product::{Product, ProductPatch};
use angel_core::repo::ad_repo::AdQuery;
use angel_core::repo::product_repo::{ProductQuery, StockReservation};
use angel_core::store::FileStore;
use angel_core::{CatalogService, Repositories, Storage};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tempfile::TempDir;

/// Runs `check` once per backend, each on fresh storage.
fn for_each_backend(check: impl Fn(&str, &Repositories<'_>)) {
    let dir = tempfile::tempdir().unwrap();
    let json = Storage::open_json(dir.path()).unwrap();
    check("json", &json.repositories().unwrap());

    let sqlite = Storage::open_sqlite_in_memory().unwrap();
    check("sqlite", &sqlite.repositories().unwrap());
}

fn product(name: &str, gbp_pence: i64) -> Product {
    let mut product = Product::new(name, name.to_lowercase());
    product.active = true;
    product.stock = 5;
    product.prices = BTreeMap::from([("GBP".to_string(), Decimal::new(gbp_pence, 2))]);
    product
}

#[test]
fn first_id_is_one_and_deleted_maximum_is_not_reused() {
    for_each_backend(|backend, repos| {
        let first = repos.products.create_product(&product("A", 100)).unwrap();
        assert_eq!(first, 1, "{backend}");
        for n in 2..=7 {
            let id = repos
                .products
                .create_product(&product(&format!("P{n}"), 100))
                .unwrap();
            assert_eq!(id, n, "{backend}");
        }

        assert!(repos.products.delete_product(7).unwrap(), "{backend}");
        let next = repos.products.create_product(&product("Next", 100)).unwrap();
        assert_eq!(next, 8, "{backend}");
    });
}

#[test]
fn legacy_json_documents_continue_after_their_maximum_id() {
    let dir: TempDir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    let mut three = product("Three", 100);
    three.id = 3;
    let mut seven = product("Seven", 100);
    seven.id = 7;
    store.write("products", &vec![three, seven]).unwrap();

    let storage = Storage::open_json(dir.path()).unwrap();
    let repos = storage.repositories().unwrap();
    assert_eq!(repos.products.create_product(&product("New", 100)).unwrap(), 8);
}

#[test]
fn json_rewrites_keep_unmodeled_legacy_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store
        .write(
            "products",
            &json!([
                {"id": 1, "name": "Mug", "active": true, "stock": 5,
                 "sku": "MUG-01", "meta_title": "Mug!"},
                {"id": 2, "name": "Tee", "active": true, "stock": 3,
                 "supplier": {"code": 7}}
            ]),
        )
        .unwrap();

    let storage = Storage::open_json(dir.path()).unwrap();
    let repos = storage.repositories().unwrap();
    assert!(repos
        .products
        .update_product(1, &ProductPatch::new().name("X"))
        .unwrap());
    assert!(matches!(
        repos.products.reserve_stock(2, 1).unwrap(),
        StockReservation::Reserved { remaining: 2 }
    ));

    let raw: Vec<Value> = store.read("products").unwrap();
    assert_eq!(raw[0]["name"], "X");
    assert_eq!(raw[0]["sku"], "MUG-01");
    assert_eq!(raw[0]["meta_title"], "Mug!");
    assert_eq!(raw[1]["stock"], 2);
    assert_eq!(raw[1]["supplier"], json!({"code": 7}));

    let mug = repos.products.get_product(1).unwrap().unwrap();
    assert_eq!(mug.extra.get("sku"), Some(&json!("MUG-01")));
}

#[test]
fn partial_update_changes_only_named_fields() {
    for_each_backend(|backend, repos| {
        let mut draft = product("Mug", 1000);
        draft.description = "Stoneware".to_string();
        draft.available_sizes = vec!["S".to_string(), "L".to_string()];
        draft.available_colors = vec!["blue".to_string()];
        draft.featured = true;
        let id = repos.products.create_product(&draft).unwrap();
        let before = repos.products.get_product(id).unwrap().unwrap();

        assert!(repos
            .products
            .update_product(id, &ProductPatch::new().name("X"))
            .unwrap());
        let after = repos.products.get_product(id).unwrap().unwrap();

        let mut expected = before.clone();
        expected.name = "X".to_string();
        assert_eq!(after, expected, "{backend}");
    });
}

#[test]
fn missing_ids_are_sentinels_not_errors() {
    for_each_backend(|backend, repos| {
        assert!(repos.products.get_product(42).unwrap().is_none(), "{backend}");
        assert!(!repos
            .products
            .update_product(42, &ProductPatch::new().name("X"))
            .unwrap());
        assert!(!repos.products.delete_product(42).unwrap(), "{backend}");
        assert!(repos.categories.get_category(42).unwrap().is_none());
        assert!(!repos
            .categories
            .update_category(42, &CategoryPatch::new().name("X"))
            .unwrap());
        assert!(repos.orders.get_order("AMP2026000000").unwrap().is_none());
        assert!(!repos.ratings.delete_rating(42).unwrap(), "{backend}");
        assert!(!repos.ads.update_ad(42, &AdPatch::default()).unwrap());
    });
}

#[test]
fn public_reads_never_include_inactive_products() {
    for_each_backend(|backend, repos| {
        let visible = repos.products.create_product(&product("Visible", 100)).unwrap();
        let mut hidden = product("Hidden", 100);
        hidden.active = false;
        let hidden = repos.products.create_product(&hidden).unwrap();

        let public: Vec<_> = repos
            .products
            .list_products(&ProductQuery::public())
            .unwrap()
            .into_iter()
            .map(|product| product.id)
            .collect();
        assert_eq!(public, vec![visible], "{backend}");

        let admin = repos.products.list_products(&ProductQuery::admin()).unwrap();
        assert!(admin.iter().any(|product| product.id == hidden), "{backend}");

        let catalog = CatalogService::new(repos);
        assert!(catalog.product(hidden).is_err(), "{backend}");
        assert!(catalog.search_products("hidden").unwrap().is_empty());
    });
}

#[test]
fn order_items_keep_their_purchase_price() {
    for_each_backend(|backend, repos| {
        let id = repos.products.create_product(&product("Mug", 1000)).unwrap();
        let order = Order::from_items(
            "Ada",
            "ada@example.com",
            "GBP",
            vec![OrderItem::snapshot(id, "Mug", Decimal::new(1000, 2), 2)],
            Decimal::ZERO,
        );
        let order_id = repos.orders.create_order(&order).unwrap();

        repos
            .products
            .update_product(
                id,
                &ProductPatch::new()
                    .name("Mug v2")
                    .prices(BTreeMap::from([("GBP".to_string(), Decimal::new(1500, 2))])),
            )
            .unwrap();

        let stored = repos.orders.get_order(&order_id).unwrap().unwrap();
        assert_eq!(stored.items[0].price, Decimal::new(1000, 2), "{backend}");
        assert_eq!(stored.items[0].name, "Mug", "{backend}");
        assert_eq!(stored.total, Decimal::new(2000, 2), "{backend}");
    });
}

#[test]
fn categories_and_ads_sort_by_display_order() {
    for_each_backend(|backend, repos| {
        let mut second = Category::new("Second", "second");
        second.sort_order = 2;
        let mut first = Category::new("First", "first");
        first.sort_order = 1;
        repos.categories.create_category(&second).unwrap();
        repos.categories.create_category(&first).unwrap();
        let names: Vec<_> = repos
            .categories
            .list_categories(true)
            .unwrap()
            .into_iter()
            .map(|category| category.name)
            .collect();
        assert_eq!(names, vec!["First", "Second"], "{backend}");

        let mut banner = Ad::new("Banner", "home");
        banner.sort_order = 5;
        let mut sidebar = Ad::new("Sidebar", "sidebar");
        sidebar.sort_order = 1;
        repos.ads.create_ad(&banner).unwrap();
        repos.ads.create_ad(&sidebar).unwrap();
        let home: Vec<_> = repos
            .ads
            .list_ads(&AdQuery::placement("home"))
            .unwrap()
            .into_iter()
            .map(|ad| ad.title)
            .collect();
        assert_eq!(home, vec!["Banner"], "{backend}");
    });
}
