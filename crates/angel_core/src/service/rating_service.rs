//! Product rating service.
//!
//! # Invariants
//! - Public submissions pass the bot gate before anything is written.
//! - Ratings attach only to active products.

use super::{ShopError, ShopResult};
use crate::integrations::{BotGate, FormKind};
use crate::model::is_valid_email;
use crate::model::product::ProductId;
use crate::model::rating::{Rating, RatingId};
use crate::repo::product_repo::ProductRepository;
use crate::repo::rating_repo::RatingRepository;
use crate::storage::Repositories;
use chrono::Utc;
use log::info;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Review posted from the public product page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RatingSubmission {
    pub product_id: ProductId,
    pub rating: u8,
    pub review: String,
    pub reviewer_name: String,
    pub reviewer_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingSummary {
    pub count: usize,
    /// Mean rating rounded to one decimal place; `None` without ratings.
    pub average: Option<Decimal>,
}

pub(crate) fn summarize(ratings: &[Rating]) -> RatingSummary {
    if ratings.is_empty() {
        return RatingSummary {
            count: 0,
            average: None,
        };
    }
    let sum: Decimal = ratings
        .iter()
        .map(|rating| Decimal::from(rating.rating))
        .sum();
    RatingSummary {
        count: ratings.len(),
        average: Some((sum / Decimal::from(ratings.len())).round_dp(1)),
    }
}

pub struct RatingService<'a> {
    ratings: &'a dyn RatingRepository,
    products: &'a dyn ProductRepository,
    gate: &'a dyn BotGate,
}

impl<'a> RatingService<'a> {
    pub fn new(repos: &'a Repositories<'_>, gate: &'a dyn BotGate) -> Self {
        Self {
            ratings: repos.ratings.as_ref(),
            products: repos.products.as_ref(),
            gate,
        }
    }

    /// Stores a public review. `form_fields` are the raw submitted fields
    /// handed to the bot gate.
    pub fn submit(
        &self,
        submission: &RatingSubmission,
        form_fields: &BTreeMap<String, String>,
    ) -> ShopResult<RatingId> {
        let verdict = self.gate.validate(FormKind::Rating, form_fields)?;
        if !verdict.valid {
            return Err(ShopError::Validation(rejection_message(&verdict.errors)));
        }

        let product_active = self
            .products
            .get_product(submission.product_id)?
            .is_some_and(|product| product.active);
        if !product_active {
            return Err(ShopError::not_found("product", submission.product_id));
        }

        let reviewer_email = submission
            .reviewer_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty());
        if reviewer_email.is_some_and(|email| !is_valid_email(email)) {
            return Err(ShopError::validation("email address is not valid"));
        }

        let mut rating = Rating::new(
            submission.product_id,
            submission.rating,
            submission.reviewer_name.trim(),
        );
        rating.review = submission.review.trim().to_string();
        rating.reviewer_email = reviewer_email.map(str::to_lowercase);
        rating.created_at = Some(Utc::now());
        let id = self.ratings.create_rating(&rating)?;
        info!(
            "event=rating_submit module=ratings status=ok rating_id={id} product_id={}",
            submission.product_id
        );
        Ok(id)
    }

    /// Ratings for one product, newest first.
    pub fn list_for_product(&self, product_id: ProductId) -> ShopResult<Vec<Rating>> {
        Ok(self.ratings.list_ratings(Some(product_id))?)
    }

    pub fn list_all(&self) -> ShopResult<Vec<Rating>> {
        Ok(self.ratings.list_ratings(None)?)
    }

    pub fn summary(&self, product_id: ProductId) -> ShopResult<RatingSummary> {
        Ok(summarize(&self.list_for_product(product_id)?))
    }

    pub fn delete(&self, id: RatingId) -> ShopResult<()> {
        if !self.ratings.delete_rating(id)? {
            return Err(ShopError::not_found("rating", id));
        }
        Ok(())
    }
}

pub(crate) fn rejection_message(errors: &[String]) -> String {
    if errors.is_empty() {
        "submission was rejected".to_string()
    } else {
        errors.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::{summarize, RatingService, RatingSubmission};
    use crate::integrations::{BotGate, FormKind, GateVerdict, OpenGate, UpstreamError};
    use crate::model::product::Product;
    use crate::model::rating::Rating;
    use crate::service::ShopError;
    use crate::storage::Storage;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    struct RejectingGate;

    impl BotGate for RejectingGate {
        fn validate(
            &self,
            _form: FormKind,
            _fields: &BTreeMap<String, String>,
        ) -> Result<GateVerdict, UpstreamError> {
            Ok(GateVerdict::reject("captcha failed"))
        }
    }

    fn submission(product_id: i64, rating: u8) -> RatingSubmission {
        RatingSubmission {
            product_id,
            rating,
            review: "Lovely".to_string(),
            reviewer_name: "Ada".to_string(),
            reviewer_email: None,
        }
    }

    #[test]
    fn summary_rounds_average_to_one_place() {
        let ratings: Vec<Rating> = [5, 4, 4]
            .into_iter()
            .map(|value| Rating::new(1, value, "R"))
            .collect();
        let summary = summarize(&ratings);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.average, Some(Decimal::new(43, 1)));
        assert_eq!(summarize(&[]).average, None);
    }

    #[test]
    fn submit_requires_gate_active_product_and_valid_rating() {
        let storage = Storage::open_sqlite_in_memory().unwrap();
        let repos = storage.repositories().unwrap();
        let mut mug = Product::new("Mug", "mug");
        mug.active = true;
        let product_id = repos.products.create_product(&mug).unwrap();
        let draft_id = repos
            .products
            .create_product(&Product::new("Draft", "draft"))
            .unwrap();

        let service = RatingService::new(&repos, &OpenGate);
        let fields = BTreeMap::new();
        service.submit(&submission(product_id, 5), &fields).unwrap();
        assert!(matches!(
            service.submit(&submission(product_id, 6), &fields),
            Err(ShopError::Validation(_))
        ));
        assert!(matches!(
            service.submit(&submission(draft_id, 4), &fields),
            Err(ShopError::NotFound { .. })
        ));

        let gated = RatingService::new(&repos, &RejectingGate);
        let err = gated.submit(&submission(product_id, 3), &fields).unwrap_err();
        assert_eq!(err.public_message(), "captcha failed");

        let summary = service.summary(product_id).unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.average, Some(Decimal::from(5)));
    }
}
