//! Storefront use-case services.
//!
//! # Responsibility
//! - Orchestrate repository and collaborator calls into use-case APIs.
//! - Translate lower-layer failures into the `ShopError` taxonomy.

pub mod catalog_service;
pub mod checkout_service;
pub mod login_service;
mod error;
pub mod newsletter_service;
pub mod order_service;
pub mod rating_service;

pub use error::{ShopError, ShopResult};
