//! Collaborator interfaces consumed by the storefront core.
//!
//! Payment, mail and bot-protection providers are reached only through these
//! traits. Concrete HTTP clients live outside this crate; tests use fakes.
//! Calls are made once, without retry.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type Metadata = BTreeMap<String, String>;

/// A collaborator call returned a non-success result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub service: &'static str,
    pub message: String,
}

impl UpstreamError {
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }
}

impl Display for UpstreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} call failed: {}", self.service, self.message)
    }
}

impl Error for UpstreamError {}

/// One hosted-checkout line, priced in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLineItem {
    pub name: String,
    pub unit_amount_minor: i64,
    pub quantity: u32,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub url: String,
    pub session_id: String,
}

pub mod intent_status {
    pub const SUCCEEDED: &str = "succeeded";
    pub const PROCESSING: &str = "processing";
    pub const REQUIRES_PAYMENT_METHOD: &str = "requires_payment_method";
    pub const CANCELED: &str = "canceled";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    /// Provider status, e.g. [`intent_status::SUCCEEDED`].
    pub status: String,
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: Metadata,
}

impl PaymentIntent {
    pub fn succeeded(&self) -> bool {
        self.status == intent_status::SUCCEEDED
    }
}

pub trait PaymentProcessor {
    fn create_checkout_session(
        &self,
        line_items: &[CheckoutLineItem],
        success_url: &str,
        cancel_url: &str,
        metadata: &Metadata,
    ) -> Result<CheckoutSession, UpstreamError>;

    fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &Metadata,
    ) -> Result<PaymentIntent, UpstreamError>;

    fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, UpstreamError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub reply_to: Option<String>,
}

pub trait MailSender {
    fn send(&self, message: &MailMessage) -> Result<(), UpstreamError>;
}

/// Public form guarded by the bot gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    Newsletter,
    Rating,
    LoginCode,
}

impl FormKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Newsletter => "newsletter",
            Self::Rating => "rating",
            Self::LoginCode => "login_code",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateVerdict {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl GateVerdict {
    pub fn pass() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![reason.into()],
        }
    }
}

/// Consulted before any public write commits.
pub trait BotGate {
    fn validate(
        &self,
        form: FormKind,
        fields: &BTreeMap<String, String>,
    ) -> Result<GateVerdict, UpstreamError>;
}

/// Gate that accepts everything; for operator tooling and local runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl BotGate for OpenGate {
    fn validate(
        &self,
        _form: FormKind,
        _fields: &BTreeMap<String, String>,
    ) -> Result<GateVerdict, UpstreamError> {
        Ok(GateVerdict::pass())
    }
}

/// Converts a major-unit amount to minor units (pence, cents).
///
/// Rounds half away from zero; `None` when out of `i64` range.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}
