use angel_core::db::open_db;
use angel_core::integrations::{
    intent_status, CheckoutLineItem, CheckoutSession, MailMessage, MailSender, Metadata,
    PaymentIntent, PaymentProcessor, UpstreamError,
};
use angel_core::model::order::Address;
use angel_core::model::product::Product;
use angel_core::repo::order_repo::OrderQuery;
use angel_core::repo::product_repo::{
    JsonProductRepository, ProductQuery, ProductRepository, SqliteProductRepository,
    StockReservation,
};
use angel_core::service::checkout_service::CustomerDetails;
use angel_core::store::FileStore;
use angel_core::{AppConfig, CartOptions, CheckoutService, RequestContext, Session, Storage};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Barrier};
use std::thread;

const WORKERS: usize = 8;

fn stocked(name: &str, stock: i64) -> Product {
    let mut product = Product::new(name, name.to_lowercase());
    product.active = true;
    product.stock = stock;
    product
}

#[test]
fn parallel_json_creates_get_distinct_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let repo = JsonProductRepository::new(store);
                barrier.wait();
                (0..5)
                    .map(|n| {
                        repo.create_product(&stocked(&format!("W{worker}N{n}"), 1))
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: Vec<i64> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    let unique: HashSet<i64> = ids.iter().copied().collect();
    assert_eq!(unique.len(), WORKERS * 5);
    assert_eq!(unique, (1..=(WORKERS * 5) as i64).collect());

    let stored = JsonProductRepository::new(store)
        .list_products(&ProductQuery::admin())
        .unwrap();
    assert_eq!(stored.len(), WORKERS * 5);
}

#[test]
fn parallel_json_reservations_never_oversell() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    let id = JsonProductRepository::new(store.clone())
        .create_product(&stocked("Mug", 10))
        .unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let repo = JsonProductRepository::new(store);
                barrier.wait();
                repo.reserve_stock(id, 2).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let reserved = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, StockReservation::Reserved { .. }))
        .count();
    assert_eq!(reserved, 5);
    let stock = JsonProductRepository::new(store)
        .get_product(id)
        .unwrap()
        .unwrap()
        .stock;
    assert_eq!(stock, 0);
}

#[test]
fn parallel_sqlite_reservations_never_oversell() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("angel.sqlite3");
    let setup = open_db(&path).unwrap();
    let id = SqliteProductRepository::try_new(&setup)
        .unwrap()
        .create_product(&stocked("Mug", 10))
        .unwrap();
    drop(setup);
    let connections: Vec<_> = (0..WORKERS).map(|_| open_db(&path).unwrap()).collect();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = connections
        .into_iter()
        .map(|conn| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let repo = SqliteProductRepository::try_new(&conn).unwrap();
                barrier.wait();
                repo.reserve_stock(id, 3).unwrap()
            })
        })
        .collect();
    let reserved = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|outcome| matches!(outcome, StockReservation::Reserved { .. }))
        .count();
    assert_eq!(reserved, 3);

    let conn = open_db(&path).unwrap();
    let remaining = SqliteProductRepository::try_new(&conn)
        .unwrap()
        .get_product(id)
        .unwrap()
        .unwrap()
        .stock;
    assert_eq!(remaining, 1);
}

/// Payment provider that only knows one captured intent.
struct CapturedPayment(PaymentIntent);

impl PaymentProcessor for CapturedPayment {
    fn create_checkout_session(
        &self,
        _line_items: &[CheckoutLineItem],
        _success_url: &str,
        _cancel_url: &str,
        _metadata: &Metadata,
    ) -> Result<CheckoutSession, UpstreamError> {
        Err(UpstreamError::new("payments", "not supported"))
    }

    fn create_payment_intent(
        &self,
        _amount_minor: i64,
        _currency: &str,
        _metadata: &Metadata,
    ) -> Result<PaymentIntent, UpstreamError> {
        Err(UpstreamError::new("payments", "not supported"))
    }

    fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, UpstreamError> {
        if id == self.0.id {
            Ok(self.0.clone())
        } else {
            Err(UpstreamError::new("payments", format!("no such intent {id}")))
        }
    }
}

struct NoMail;

impl MailSender for NoMail {
    fn send(&self, _message: &MailMessage) -> Result<(), UpstreamError> {
        Ok(())
    }
}

fn customer() -> CustomerDetails {
    CustomerDetails {
        name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        shipping_address: Address {
            line1: "1 Analytical Row".to_string(),
            city: "London".to_string(),
            postcode: "N1 1AA".to_string(),
            country: "GB".to_string(),
            ..Address::default()
        },
        ..CustomerDetails::default()
    }
}

/// Completes one captured payment from every worker at once.
///
/// Returns the order ids the workers saw and the storage for inspection.
fn complete_in_parallel(open: impl Fn() -> Storage + Sync) -> (Vec<String>, Storage) {
    let config = AppConfig::from_lookup(|key| {
        (key == "ANGEL_STORAGE_BACKEND").then(|| "json".to_string())
    })
    .unwrap();
    let storage = open();
    let mut session = Session::new();
    {
        let repos = storage.repositories().unwrap();
        let mut mug = stocked("Mug", 100);
        mug.prices = BTreeMap::from([("GBP".to_string(), Decimal::new(1000, 2))]);
        let id = repos.products.create_product(&mug).unwrap();
        session
            .cart
            .add(repos.products.as_ref(), id, 2, &CartOptions::none())
            .unwrap();
    }
    let payment = CapturedPayment(PaymentIntent {
        id: "pi_1".to_string(),
        client_secret: None,
        status: intent_status::SUCCEEDED.to_string(),
        amount_minor: 2000,
        currency: "gbp".to_string(),
        metadata: Metadata::from([("session_id".to_string(), session.id.to_string())]),
    });
    let barrier = Barrier::new(WORKERS);

    let order_ids = thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let mut session = session.clone();
                let (open, config, payment, barrier) = (&open, &config, &payment, &barrier);
                scope.spawn(move || {
                    let storage = open();
                    let repos = storage.repositories().unwrap();
                    let checkout = CheckoutService::new(&repos, payment, &NoMail);
                    let mut ctx = RequestContext::new(&mut session, config);
                    barrier.wait();
                    let order = checkout.complete(&mut ctx, "pi_1", &customer()).unwrap();
                    assert!(session.cart.is_empty());
                    order.id
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });
    (order_ids, storage)
}

fn assert_single_order(order_ids: &[String], storage: &Storage) {
    let unique: HashSet<&String> = order_ids.iter().collect();
    assert_eq!(unique.len(), 1, "{order_ids:?}");

    let repos = storage.repositories().unwrap();
    let orders = repos.orders.list_orders(&OrderQuery::all()).unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_intent_id.as_deref(), Some("pi_1"));
    let mug = repos.products.get_product(orders[0].items[0].product_id).unwrap().unwrap();
    assert_eq!(mug.stock, 98);
}

#[test]
fn parallel_json_completions_of_one_payment_create_one_order() {
    let dir = tempfile::tempdir().unwrap();
    let (order_ids, storage) = complete_in_parallel(|| Storage::open_json(dir.path()).unwrap());
    assert_single_order(&order_ids, &storage);
}

#[test]
fn parallel_sqlite_completions_of_one_payment_create_one_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("angel.sqlite3");
    let (order_ids, storage) = complete_in_parallel(|| Storage::open_sqlite(&path).unwrap());
    assert_single_order(&order_ids, &storage);
}
