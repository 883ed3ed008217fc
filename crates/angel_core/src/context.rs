//! Per-request context passed explicitly through service calls.

use crate::config::AppConfig;
use crate::model::settings::{Settings, KEY_DEFAULT_CURRENCY};
use crate::session::Session;

/// Mutable session plus immutable process configuration.
pub struct RequestContext<'a> {
    pub session: &'a mut Session,
    pub config: &'a AppConfig,
}

impl<'a> RequestContext<'a> {
    pub fn new(session: &'a mut Session, config: &'a AppConfig) -> Self {
        Self { session, config }
    }

    /// Currency for pricing this request.
    ///
    /// The visitor's choice wins when the shop supports it; otherwise the
    /// shop default from settings, then the configured default.
    pub fn currency(&self, settings: &Settings) -> String {
        if let Some(chosen) = self.session.currency.as_deref() {
            if settings.supports_currency(chosen) {
                return chosen.trim().to_ascii_uppercase();
            }
        }
        if settings.get(KEY_DEFAULT_CURRENCY).is_some() {
            return settings.default_currency();
        }
        self.config.default_currency.clone()
    }
}
