//! Pricing Resolution
//!
//! The client never supplies a price. Every checkout amount is derived
//! here, from the plan catalog or the static one-time price table, in
//! integer smallest-unit math (tiyn: 1 UZS = 100 tiyn).

use serde::Serialize;
use std::sync::Arc;

use crate::error::{PaymentError, Result};
use crate::order::PurchaseType;
use crate::plan::{Course, PlanStore, SubscriptionPlan};

/// Lifetime course access costs this many months of the course's own
/// subscription plan.
pub const COURSE_ACCESS_MULTIPLIER: i64 = 3;

/// AI credits are sold in batches of this size.
pub const AI_CREDITS_BATCH: u32 = 50;

/// Static one-time price table, loaded once at startup and passed by
/// reference — no env lookups mid-request.
#[derive(Clone, Debug)]
pub struct PricingCatalog {
    /// Price of one roadmap generation, in tiyn
    pub roadmap_generation: i64,
    /// Price of one batch of [`AI_CREDITS_BATCH`] credits, in tiyn
    pub ai_credits: i64,
    pub currency: String,
}

impl Default for PricingCatalog {
    fn default() -> Self {
        Self {
            roadmap_generation: 15_000 * 100,
            ai_credits: 10_000 * 100,
            currency: "UZS".into(),
        }
    }
}

impl PricingCatalog {
    /// Read overrides from `PRICE_ROADMAP_GENERATION` and
    /// `PRICE_AI_CREDITS` (tiyn), falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            roadmap_generation: env_price("PRICE_ROADMAP_GENERATION")
                .unwrap_or(defaults.roadmap_generation),
            ai_credits: env_price("PRICE_AI_CREDITS").unwrap_or(defaults.ai_credits),
            currency: defaults.currency,
        }
    }
}

fn env_price(var: &str) -> Option<i64> {
    std::env::var(var).ok()?.parse().ok()
}

/// An authoritative price for one order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quote {
    /// Smallest currency unit
    pub amount: i64,
    pub currency: String,
    pub description: String,
}

/// One-time purchase catalog entry (for the pricing endpoint).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchasePricing {
    pub purchase_type: PurchaseType,
    pub name: String,
    pub price: i64,
    pub currency: String,
    pub price_formatted: String,
}

pub struct PricingResolver {
    catalog: PricingCatalog,
    plans: Arc<dyn PlanStore>,
}

impl PricingResolver {
    pub fn new(catalog: PricingCatalog, plans: Arc<dyn PlanStore>) -> Self {
        Self { catalog, plans }
    }

    /// Price of one subscription period of `plan`.
    pub fn subscription_quote(&self, plan: &SubscriptionPlan) -> Quote {
        Quote {
            amount: plan.price_monthly,
            currency: plan.currency.clone(),
            description: format!("{} - Monthly", plan.name),
        }
    }

    /// Price of lifetime access to a course: the course's own active
    /// plan times [`COURSE_ACCESS_MULTIPLIER`]. Fails when the course
    /// is unknown or carries no active course plan.
    pub fn course_access_quote(&self, course_id: &str) -> Result<(Course, Quote)> {
        let course = self
            .plans
            .get_course(course_id)?
            .ok_or_else(|| PaymentError::NotFound(format!("course {course_id}")))?;

        let plan = self.plans.active_course_plan(course_id)?.ok_or_else(|| {
            PaymentError::PricingUnavailable(format!(
                "course {course_id} has no active subscription plan"
            ))
        })?;

        let quote = Quote {
            amount: plan.price_monthly * COURSE_ACCESS_MULTIPLIER,
            currency: plan.currency,
            description: format!("{} - Lifetime Access", course.title),
        };
        Ok((course, quote))
    }

    /// Price of a static-catalog one-time purchase.
    pub fn one_time_quote(&self, purchase_type: PurchaseType, quantity: u32) -> Result<Quote> {
        let (unit, name) = match purchase_type {
            PurchaseType::RoadmapGeneration => {
                (self.catalog.roadmap_generation, "Roadmap Generation")
            }
            PurchaseType::AiCredits => {
                (self.catalog.ai_credits, "AI Credits (50)")
            }
            PurchaseType::CourseAccess => {
                return Err(PaymentError::Validation(
                    "course_access is priced per course, not from the catalog".into(),
                ));
            }
        };

        let quantity = quantity.max(1);
        Ok(Quote {
            amount: unit * i64::from(quantity),
            currency: self.catalog.currency.clone(),
            description: format!("{name} x{quantity}"),
        })
    }

    /// Static one-time catalog for display.
    pub fn purchase_catalog(&self) -> Vec<PurchasePricing> {
        [
            (PurchaseType::RoadmapGeneration, "Roadmap Generation", self.catalog.roadmap_generation),
            (PurchaseType::AiCredits, "AI Credits (50)", self.catalog.ai_credits),
        ]
        .into_iter()
        .map(|(purchase_type, name, price)| PurchasePricing {
            purchase_type,
            name: name.into(),
            price,
            currency: self.catalog.currency.clone(),
            price_formatted: format_price(price, &self.catalog.currency),
        })
        .collect()
    }
}

/// Display helper: tiyn to whole currency units, thousands-grouped,
/// suffixed with the currency code. Pure presentation, no side effects.
pub fn format_price(amount: i64, currency: &str) -> String {
    let whole = amount / 100;
    let digits = whole.unsigned_abs().to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    if whole < 0 {
        grouped.insert(0, '-');
    }
    format!("{grouped} {currency}")
}
