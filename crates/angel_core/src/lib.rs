//! Core domain logic for the Angel Marketplace storefront.
//! This crate is the single source of truth for business invariants.

pub mod cart;
pub mod config;
pub mod context;
pub mod db;
pub mod integrations;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod session;
pub mod storage;
pub mod store;

pub use cart::{CartError, CartKey, CartLine, CartOptions, CartSession, PricedLine};
pub use config::{AppConfig, ConfigError, StorageBackend, StorageConfig};
pub use context::RequestContext;
pub use logging::{default_log_level, init_logging, logging_status};
pub use repo::{RepoError, RepoResult};
pub use service::catalog_service::CatalogService;
pub use service::checkout_service::CheckoutService;
pub use service::login_service::LoginService;
pub use service::newsletter_service::NewsletterService;
pub use service::order_service::OrderService;
pub use service::rating_service::RatingService;
pub use service::{ShopError, ShopResult};
pub use session::{MemorySessionStore, PendingLogin, Session, SessionId, SessionStore};
pub use storage::{Repositories, Storage};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
