//! Passwordless customer sign-in by emailed one-time code.
//!
//! # Responsibility
//! - Mail a short-lived code to customers who have placed orders.
//! - Confirm the code and mark the session as signed in.
//!
//! # Invariants
//! - A code is bound to the session that requested it and to one address.
//! - A code is single-use and is discarded once it expires or has been
//!   missed `MAX_CODE_ATTEMPTS` times.
//! - The response to a code request never reveals whether an address has
//!   orders.

use super::order_service::OrderService;
use super::rating_service::rejection_message;
use super::{ShopError, ShopResult};
use crate::context::RequestContext;
use crate::integrations::{BotGate, FormKind, MailMessage, MailSender};
use crate::model::is_valid_email;
use crate::model::newsletter::normalize_email;
use crate::model::order::Order;
use crate::repo::order_repo::{OrderQuery, OrderRepository};
use crate::repo::settings_repo::SettingsRepository;
use crate::session::PendingLogin;
use crate::storage::Repositories;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use rand::Rng;
use std::collections::BTreeMap;

pub const LOGIN_CODE_TTL_MINUTES: i64 = 15;
pub const MAX_CODE_ATTEMPTS: u32 = 5;

pub struct LoginService<'a> {
    orders: &'a dyn OrderRepository,
    settings: &'a dyn SettingsRepository,
    mailer: &'a dyn MailSender,
    gate: &'a dyn BotGate,
}

impl<'a> LoginService<'a> {
    pub fn new(
        repos: &'a Repositories<'_>,
        mailer: &'a dyn MailSender,
        gate: &'a dyn BotGate,
    ) -> Self {
        Self {
            orders: repos.orders.as_ref(),
            settings: repos.settings.as_ref(),
            mailer,
            gate,
        }
    }

    /// Mails a sign-in code to `email` if it has placed orders.
    ///
    /// Any earlier code of this session is discarded first.
    pub fn request_code(
        &self,
        ctx: &mut RequestContext<'_>,
        email: &str,
        form_fields: &BTreeMap<String, String>,
    ) -> ShopResult<()> {
        self.request_code_at(ctx, email, form_fields, Utc::now())
    }

    /// Confirms `code` and signs the session in; returns the customer email.
    pub fn verify_code(&self, ctx: &mut RequestContext<'_>, code: &str) -> ShopResult<String> {
        verify_code_at(ctx, code, Utc::now())
    }

    pub fn sign_out(&self, ctx: &mut RequestContext<'_>) {
        ctx.session.customer_email = None;
        ctx.session.pending_login = None;
    }

    /// Orders of the signed-in customer, newest first.
    pub fn order_history(&self, ctx: &RequestContext<'_>) -> ShopResult<Vec<Order>> {
        let Some(email) = ctx.session.customer_email.as_deref() else {
            return Err(ShopError::validation("sign in to view your orders"));
        };
        OrderService::from_repo(self.orders).customer_history(email)
    }

    fn request_code_at(
        &self,
        ctx: &mut RequestContext<'_>,
        email: &str,
        form_fields: &BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> ShopResult<()> {
        let verdict = self.gate.validate(FormKind::LoginCode, form_fields)?;
        if !verdict.valid {
            return Err(ShopError::Validation(rejection_message(&verdict.errors)));
        }
        if !is_valid_email(email) {
            return Err(ShopError::validation("email address is not valid"));
        }
        let email = normalize_email(email);
        ctx.session.pending_login = None;

        let known = !self
            .orders
            .list_orders(&OrderQuery::all().for_customer(email.as_str()))?
            .is_empty();
        if !known {
            info!("event=login_code_request module=login status=ok sent=false");
            return Ok(());
        }

        let code = generate_code(&mut rand::rng());
        let settings = self.settings.load_settings()?;
        let site = settings
            .site_name()
            .unwrap_or_else(|| "Angel Marketplace".to_string());
        let message = MailMessage {
            to: email.clone(),
            subject: format!("{site}: your sign-in code"),
            html_body: format!(
                "<p>Your sign-in code is <strong>{code}</strong>.</p>\
                 <p>It expires in {LOGIN_CODE_TTL_MINUTES} minutes.</p>"
            ),
            reply_to: settings.site_email(),
        };
        self.mailer.send(&message)?;

        ctx.session.pending_login = Some(PendingLogin {
            email,
            code,
            expires_at: now + Duration::minutes(LOGIN_CODE_TTL_MINUTES),
            failed_attempts: 0,
        });
        info!("event=login_code_request module=login status=ok sent=true");
        Ok(())
    }
}

fn verify_code_at(
    ctx: &mut RequestContext<'_>,
    code: &str,
    now: DateTime<Utc>,
) -> ShopResult<String> {
    let Some(pending) = ctx.session.pending_login.as_mut() else {
        return Err(ShopError::validation("no sign-in code was requested"));
    };
    if now >= pending.expires_at {
        ctx.session.pending_login = None;
        return Err(ShopError::validation(
            "sign-in code has expired, request a new one",
        ));
    }
    if pending.code != code.trim() {
        pending.failed_attempts += 1;
        if pending.failed_attempts >= MAX_CODE_ATTEMPTS {
            ctx.session.pending_login = None;
            warn!("event=login_verify module=login status=error error_code=attempts_exhausted");
            return Err(ShopError::validation(
                "too many wrong codes, request a new one",
            ));
        }
        return Err(ShopError::validation("sign-in code is incorrect"));
    }

    let email = pending.email.clone();
    ctx.session.pending_login = None;
    ctx.session.customer_email = Some(email.clone());
    info!("event=login_verify module=login status=ok");
    Ok(email)
}

fn generate_code(rng: &mut impl Rng) -> String {
    let code: u32 = rng.random_range(0..1_000_000);
    format!("{code:06}")
}
