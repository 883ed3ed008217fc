//! Newsletter subscription service.
//!
//! # Invariants
//! - One subscriber row per normalized email.
//! - Unsubscribing keeps the row and clears `active`.

use super::rating_service::rejection_message;
use super::{ShopError, ShopResult};
use crate::integrations::{BotGate, FormKind};
use crate::model::is_valid_email;
use crate::model::newsletter::{Subscriber, SubscriberId, SubscriberPatch};
use crate::repo::newsletter_repo::NewsletterRepository;
use crate::repo::RepoError;
use crate::storage::Repositories;
use chrono::Utc;
use log::info;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed(SubscriberId),
    /// A previously unsubscribed address was switched back on.
    Reactivated(SubscriberId),
    AlreadySubscribed(SubscriberId),
}

impl SubscribeOutcome {
    pub fn subscriber_id(self) -> SubscriberId {
        match self {
            Self::Subscribed(id) | Self::Reactivated(id) | Self::AlreadySubscribed(id) => id,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Subscribed(_) => "Thanks for subscribing!",
            Self::Reactivated(_) => "Welcome back! Your subscription is active again.",
            Self::AlreadySubscribed(_) => "You are already subscribed.",
        }
    }
}

pub struct NewsletterService<'a> {
    newsletter: &'a dyn NewsletterRepository,
    gate: &'a dyn BotGate,
}

impl<'a> NewsletterService<'a> {
    pub fn new(repos: &'a Repositories<'_>, gate: &'a dyn BotGate) -> Self {
        Self {
            newsletter: repos.newsletter.as_ref(),
            gate,
        }
    }

    pub fn subscribe(
        &self,
        email: &str,
        name: Option<&str>,
        form_fields: &BTreeMap<String, String>,
    ) -> ShopResult<SubscribeOutcome> {
        let verdict = self.gate.validate(FormKind::Newsletter, form_fields)?;
        if !verdict.valid {
            return Err(ShopError::Validation(rejection_message(&verdict.errors)));
        }
        if !is_valid_email(email) {
            return Err(ShopError::validation("email address is not valid"));
        }

        let outcome = match self.newsletter.find_subscriber_by_email(email)? {
            Some(existing) if existing.active => SubscribeOutcome::AlreadySubscribed(existing.id),
            Some(existing) => {
                let patch = SubscriberPatch {
                    active: Some(true),
                    subscribed_at: Some(Utc::now()),
                    ..SubscriberPatch::default()
                };
                if !self.newsletter.update_subscriber(existing.id, &patch)? {
                    return Err(ShopError::not_found("subscriber", existing.id));
                }
                SubscribeOutcome::Reactivated(existing.id)
            }
            None => self.create(email, name)?,
        };
        info!(
            "event=newsletter_subscribe module=newsletter status=ok subscriber_id={} outcome={outcome:?}",
            outcome.subscriber_id()
        );
        Ok(outcome)
    }

    /// Returns `false` when the address is unknown or already inactive.
    pub fn unsubscribe(&self, email: &str) -> ShopResult<bool> {
        let Some(existing) = self.newsletter.find_subscriber_by_email(email)? else {
            return Ok(false);
        };
        if !existing.active {
            return Ok(false);
        }
        let patch = SubscriberPatch {
            active: Some(false),
            ..SubscriberPatch::default()
        };
        let changed = self.newsletter.update_subscriber(existing.id, &patch)?;
        if changed {
            info!(
                "event=newsletter_unsubscribe module=newsletter status=ok subscriber_id={}",
                existing.id
            );
        }
        Ok(changed)
    }

    pub fn list(&self, active_only: bool) -> ShopResult<Vec<Subscriber>> {
        Ok(self.newsletter.list_subscribers(active_only)?)
    }

    pub fn delete(&self, id: SubscriberId) -> ShopResult<()> {
        if !self.newsletter.delete_subscriber(id)? {
            return Err(ShopError::not_found("subscriber", id));
        }
        Ok(())
    }

    fn create(&self, email: &str, name: Option<&str>) -> ShopResult<SubscribeOutcome> {
        let mut subscriber = Subscriber::new(email);
        subscriber.name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        subscriber.subscribed_at = Some(Utc::now());
        match self.newsletter.create_subscriber(&subscriber) {
            Ok(id) => Ok(SubscribeOutcome::Subscribed(id)),
            // Lost a race with a concurrent signup for the same address.
            Err(RepoError::Conflict(_)) => self
                .newsletter
                .find_subscriber_by_email(email)?
                .map(|existing| SubscribeOutcome::AlreadySubscribed(existing.id))
                .ok_or_else(|| ShopError::not_found("subscriber", email)),
            Err(err) => Err(err.into()),
        }
    }
}
