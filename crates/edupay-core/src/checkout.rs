//! Checkout Orchestration
//!
//! Validates a purchase or subscription request, resolves the
//! authoritative price, writes exactly one `pending` ledger row, and
//! only then asks the provider gateway for a redirect URL — so the
//! webhook always has something to find, even if the user never pays.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::audit::AuditEmitter;
use crate::entitlements::{AccessService, EntitlementStore};
use crate::error::{PaymentError, Result};
use crate::gateway::ProviderGateway;
use crate::ledger::OrderLedger;
use crate::order::{OrderStatus, OrderStatusInfo, ProviderId, PurchaseType};
use crate::plan::PlanStore;
use crate::pricing::{PricingResolver, Quote, format_price};
use crate::subscription::SubscriptionStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Subscription,
    Purchase,
}

/// Checkout request body. Note the absence of any amount field: prices
/// are resolved server-side, and anything the client might send is
/// never deserialized in the first place.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub order_type: OrderType,
    /// Required for subscription orders
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Required for purchase orders
    #[serde(default)]
    pub purchase_type: Option<PurchaseType>,
    /// Required for `course_access` purchases
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
    pub provider: ProviderId,
    #[serde(default)]
    pub return_url: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order_id: String,
    pub payment_url: String,
    pub amount: i64,
    pub currency: String,
    pub provider: ProviderId,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: ProviderId,
    pub name: &'static str,
    pub configured: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHistoryItem {
    pub id: String,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub description: String,
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub provider: ProviderId,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePricing {
    pub course_id: String,
    pub course_slug: String,
    pub course_name: String,
    pub price: i64,
    pub currency: String,
    pub price_formatted: String,
    pub has_access: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCourseAccess {
    pub course_id: String,
    pub course_slug: String,
    pub course_name: String,
    pub purchased_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

enum PreparedOrder {
    Subscription { plan_id: String },
    Purchase {
        purchase_type: PurchaseType,
        quantity: u32,
        metadata: HashMap<String, String>,
    },
}

pub struct CheckoutService {
    ledger: Arc<dyn OrderLedger>,
    subscriptions: Arc<dyn SubscriptionStore>,
    plans: Arc<dyn PlanStore>,
    entitlements: Arc<dyn EntitlementStore>,
    pricing: PricingResolver,
    access: AccessService,
    gateways: HashMap<ProviderId, Arc<dyn ProviderGateway>>,
    audit: AuditEmitter,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn OrderLedger>,
        subscriptions: Arc<dyn SubscriptionStore>,
        plans: Arc<dyn PlanStore>,
        entitlements: Arc<dyn EntitlementStore>,
        pricing: PricingResolver,
        access: AccessService,
        gateways: Vec<Arc<dyn ProviderGateway>>,
    ) -> Self {
        Self {
            ledger,
            subscriptions,
            plans,
            entitlements,
            pricing,
            access,
            gateways: gateways.into_iter().map(|g| (g.id(), g)).collect(),
            audit: AuditEmitter::disabled(),
        }
    }

    #[must_use]
    pub fn with_audit(mut self, audit: AuditEmitter) -> Self {
        self.audit = audit;
        self
    }

    /// Validate, price, record a pending order, and produce the
    /// provider redirect URL.
    pub fn create_checkout(&self, user_id: &str, req: &CheckoutRequest) -> Result<CheckoutResponse> {
        let (prepared, quote) = self.prepare(user_id, req)?;

        let gateway = self
            .gateways
            .get(&req.provider)
            .ok_or_else(|| PaymentError::Validation(format!("unknown provider {}", req.provider)))?;
        if !gateway.is_configured() {
            return Err(PaymentError::Validation(format!(
                "{} is not configured",
                req.provider.display_name()
            )));
        }

        let order_id = match prepared {
            PreparedOrder::Subscription { plan_id } => {
                let subscription = self.subscriptions.upsert_pending(user_id, &plan_id)?;
                self.ledger
                    .create_payment(&subscription.id, quote.amount, &quote.currency, req.provider)?
                    .id
            }
            PreparedOrder::Purchase {
                purchase_type,
                quantity,
                metadata,
            } => {
                self.ledger
                    .create_purchase(
                        user_id,
                        purchase_type,
                        quantity,
                        quote.amount,
                        &quote.currency,
                        req.provider,
                        metadata,
                    )?
                    .id
            }
        };

        let payment_url =
            gateway.generate_payment_link(&order_id, quote.amount, req.return_url.as_deref())?;

        tracing::info!(
            order_id,
            amount = quote.amount,
            provider = %req.provider,
            "checkout created"
        );
        self.audit
            .emit("checkout.created", Some(&order_id), quote.description.clone());

        Ok(CheckoutResponse {
            order_id,
            payment_url,
            amount: quote.amount,
            currency: quote.currency,
            provider: req.provider,
        })
    }

    fn prepare(&self, user_id: &str, req: &CheckoutRequest) -> Result<(PreparedOrder, Quote)> {
        match req.order_type {
            OrderType::Subscription => {
                let plan_id = req.plan_id.as_deref().ok_or_else(|| {
                    PaymentError::Validation("planId is required for subscription".into())
                })?;
                let plan = self
                    .plans
                    .get_plan(plan_id)?
                    .filter(|p| p.is_active)
                    .ok_or_else(|| PaymentError::NotFound("subscription plan not found".into()))?;

                let quote = self.pricing.subscription_quote(&plan);
                Ok((
                    PreparedOrder::Subscription {
                        plan_id: plan_id.to_string(),
                    },
                    quote,
                ))
            }
            OrderType::Purchase => {
                let purchase_type = req.purchase_type.ok_or_else(|| {
                    PaymentError::Validation("purchaseType is required for purchase".into())
                })?;

                if purchase_type == PurchaseType::CourseAccess {
                    let course_id = req.course_id.as_deref().ok_or_else(|| {
                        PaymentError::Validation(
                            "courseId is required for course_access purchase".into(),
                        )
                    })?;

                    let (course, quote) = self.pricing.course_access_quote(course_id)?;
                    if self.access.user_has_course_access(user_id, course_id)? {
                        return Err(PaymentError::Conflict(
                            "user already has access to this course".into(),
                        ));
                    }

                    let metadata = HashMap::from([
                        ("courseId".to_string(), course.id),
                        ("courseSlug".to_string(), course.slug),
                        ("courseName".to_string(), course.title),
                    ]);
                    Ok((
                        PreparedOrder::Purchase {
                            purchase_type,
                            quantity: 1,
                            metadata,
                        },
                        quote,
                    ))
                } else {
                    let quantity = req.quantity.unwrap_or(1).max(1);
                    let quote = self.pricing.one_time_quote(purchase_type, quantity)?;
                    Ok((
                        PreparedOrder::Purchase {
                            purchase_type,
                            quantity,
                            metadata: HashMap::new(),
                        },
                        quote,
                    ))
                }
            }
        }
    }

    pub fn order_status(&self, order_id: &str) -> Result<OrderStatusInfo> {
        self.ledger.status(order_id)
    }

    pub fn available_providers(&self) -> Vec<ProviderInfo> {
        let mut providers: Vec<ProviderInfo> = self
            .gateways
            .values()
            .map(|g| ProviderInfo {
                id: g.id(),
                name: g.id().display_name(),
                configured: g.is_configured(),
            })
            .collect();
        providers.sort_by_key(|p| p.id.as_str());
        providers
    }

    pub fn purchase_pricing(&self) -> Vec<crate::pricing::PurchasePricing> {
        self.pricing.purchase_catalog()
    }

    /// Lifetime price and ownership flag for one course.
    pub fn course_pricing(&self, course_id: &str, user_id: Option<&str>) -> Result<CoursePricing> {
        let (course, quote) = self.pricing.course_access_quote(course_id)?;
        let has_access = match user_id {
            Some(user_id) => self.access.user_has_course_access(user_id, course_id)?,
            None => false,
        };

        Ok(CoursePricing {
            course_id: course.id,
            course_slug: course.slug,
            course_name: course.title,
            price: quote.amount,
            price_formatted: format_price(quote.amount, &quote.currency),
            currency: quote.currency,
            has_access,
        })
    }

    /// Catalog view: every course that currently has a price.
    pub fn all_courses_pricing(&self, user_id: Option<&str>) -> Result<Vec<CoursePricing>> {
        let mut pricing = Vec::new();
        for course in self.plans.courses()? {
            match self.course_pricing(&course.id, user_id) {
                Ok(p) => pricing.push(p),
                // Courses without an active plan are simply not for sale
                Err(PaymentError::PricingUnavailable(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(pricing)
    }

    /// Settled payments and purchases for a user, newest first.
    pub fn payment_history(&self, user_id: &str) -> Result<Vec<PaymentHistoryItem>> {
        let mut history = Vec::new();

        for subscription in self.subscriptions.for_user(user_id)? {
            let description = match self.plans.get_plan(&subscription.plan_id)? {
                Some(plan) => format!("{} - Monthly", plan.name),
                None => "Subscription - Monthly".to_string(),
            };
            for payment in self.ledger.payments_for_subscription(&subscription.id)? {
                if payment.status.is_settled() {
                    history.push(PaymentHistoryItem {
                        id: payment.id,
                        order_type: "subscription",
                        description: description.clone(),
                        amount: payment.amount,
                        currency: payment.currency,
                        status: payment.status,
                        provider: payment.provider,
                        created_at: payment.created_at,
                    });
                }
            }
        }

        for purchase in self.ledger.purchases_for_user(user_id)? {
            if !purchase.status.is_settled() {
                continue;
            }
            let description = match purchase.purchase_type {
                PurchaseType::CourseAccess => purchase
                    .metadata
                    .get("courseName")
                    .map_or_else(|| "Course Access".to_string(), |n| format!("{n} - Lifetime Access")),
                PurchaseType::RoadmapGeneration => format!("Roadmap Generation x{}", purchase.quantity),
                PurchaseType::AiCredits => format!("AI Credits (50) x{}", purchase.quantity),
            };
            history.push(PaymentHistoryItem {
                id: purchase.id,
                order_type: "purchase",
                description,
                amount: purchase.amount,
                currency: purchase.currency,
                status: purchase.status,
                provider: purchase.provider,
                created_at: purchase.created_at,
            });
        }

        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(history)
    }

    /// Courses the user holds a CourseAccess row for.
    pub fn user_course_accesses(&self, user_id: &str) -> Result<Vec<UserCourseAccess>> {
        let mut accesses = Vec::new();
        for access in self.entitlements.course_accesses(user_id)? {
            let Some(course) = self.plans.get_course(&access.course_id)? else {
                continue;
            };
            accesses.push(UserCourseAccess {
                course_id: course.id,
                course_slug: course.slug,
                course_name: course.title,
                purchased_at: access.created_at,
                expires_at: access.expires_at,
            });
        }
        Ok(accesses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::MemoryEntitlementStore;
    use crate::ledger::MemoryOrderLedger;
    use crate::plan::{Course, MemoryPlanStore, PlanType, SubscriptionPlan};
    use crate::pricing::PricingCatalog;
    use crate::subscription::MemorySubscriptionStore;

    struct FakeGateway {
        id: ProviderId,
        configured: bool,
    }

    impl ProviderGateway for FakeGateway {
        fn id(&self) -> ProviderId {
            self.id
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        fn generate_payment_link(
            &self,
            order_id: &str,
            amount: i64,
            _return_url: Option<&str>,
        ) -> Result<String> {
            Ok(format!("https://pay.test/{}/{order_id}?a={amount}", self.id))
        }
    }

    struct Fixture {
        ledger: Arc<MemoryOrderLedger>,
        entitlements: Arc<MemoryEntitlementStore>,
        service: CheckoutService,
    }

    fn fixture(payme_configured: bool) -> Fixture {
        let ledger = Arc::new(MemoryOrderLedger::new());
        let subscriptions = Arc::new(MemorySubscriptionStore::new());
        let plans = Arc::new(MemoryPlanStore::new());
        let entitlements = Arc::new(MemoryEntitlementStore::new());

        plans.add_course(Course {
            id: "c1".into(),
            slug: "go-basics".into(),
            title: "Go Basics".into(),
        });
        plans.add_plan(SubscriptionPlan {
            id: "p1".into(),
            slug: "go-basics-monthly".into(),
            name: "Go Basics Monthly".into(),
            plan_type: PlanType::Course,
            course_id: Some("c1".into()),
            price_monthly: 150_000,
            currency: "UZS".into(),
            is_active: true,
        });

        let pricing = PricingResolver::new(PricingCatalog::default(), plans.clone());
        let access = AccessService::new(entitlements.clone(), subscriptions.clone(), plans.clone());
        let gateways: Vec<Arc<dyn ProviderGateway>> = vec![
            Arc::new(FakeGateway {
                id: ProviderId::Payme,
                configured: payme_configured,
            }),
            Arc::new(FakeGateway {
                id: ProviderId::Click,
                configured: true,
            }),
        ];

        let service = CheckoutService::new(
            ledger.clone(),
            subscriptions,
            plans,
            entitlements.clone(),
            pricing,
            access,
            gateways,
        );
        Fixture {
            ledger,
            entitlements,
            service,
        }
    }

    fn subscription_request() -> CheckoutRequest {
        CheckoutRequest {
            order_type: OrderType::Subscription,
            plan_id: Some("p1".into()),
            purchase_type: None,
            course_id: None,
            quantity: None,
            provider: ProviderId::Payme,
            return_url: None,
        }
    }

    #[test]
    fn test_subscription_checkout_uses_plan_price() {
        let f = fixture(true);
        let response = f.service.create_checkout("u1", &subscription_request()).unwrap();

        assert_eq!(response.amount, 150_000);
        assert!(response.payment_url.contains(&response.order_id));

        // Price integrity: the ledger row carries the resolver's price
        let status = f.ledger.status(&response.order_id).unwrap();
        assert_eq!(status.amount, 150_000);
        assert_eq!(status.status, OrderStatus::Pending);
        assert_eq!(status.order_type, "subscription");
    }

    #[test]
    fn test_missing_plan_id_is_validation_error() {
        let f = fixture(true);
        let mut req = subscription_request();
        req.plan_id = None;

        assert!(matches!(
            f.service.create_checkout("u1", &req),
            Err(PaymentError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_plan_is_not_found() {
        let f = fixture(true);
        let mut req = subscription_request();
        req.plan_id = Some("missing".into());

        assert!(matches!(
            f.service.create_checkout("u1", &req),
            Err(PaymentError::NotFound(_))
        ));
    }

    #[test]
    fn test_unconfigured_provider_rejected_before_ledger_write() {
        let f = fixture(false);
        assert!(matches!(
            f.service.create_checkout("u1", &subscription_request()),
            Err(PaymentError::Validation(_))
        ));
        // No orphan pending row
        assert!(f.ledger.purchases_for_user("u1").unwrap().is_empty());
    }

    #[test]
    fn test_course_access_checkout_and_duplicate_conflict() {
        let f = fixture(true);
        let req = CheckoutRequest {
            order_type: OrderType::Purchase,
            plan_id: None,
            purchase_type: Some(PurchaseType::CourseAccess),
            course_id: Some("c1".into()),
            quantity: None,
            provider: ProviderId::Click,
            return_url: None,
        };

        let response = f.service.create_checkout("u1", &req).unwrap();
        assert_eq!(response.amount, 450_000); // 3x monthly

        // Simulate settlement granting access, then re-purchase
        f.entitlements
            .grant_course_access("u1", "c1", &response.order_id)
            .unwrap();
        assert!(matches!(
            f.service.create_checkout("u1", &req),
            Err(PaymentError::Conflict(_))
        ));
    }

    #[test]
    fn test_course_pricing_reflects_access() {
        let f = fixture(true);

        let before = f.service.course_pricing("c1", Some("u1")).unwrap();
        assert_eq!(before.price, 450_000);
        assert_eq!(before.price_formatted, "4 500 UZS");
        assert!(!before.has_access);

        f.entitlements
            .grant_course_access("u1", "c1", "purchase-1")
            .unwrap();
        let after = f.service.course_pricing("c1", Some("u1")).unwrap();
        assert!(after.has_access);
    }

    #[test]
    fn test_quantity_scales_one_time_purchases() {
        let f = fixture(true);
        let req = CheckoutRequest {
            order_type: OrderType::Purchase,
            plan_id: None,
            purchase_type: Some(PurchaseType::AiCredits),
            course_id: None,
            quantity: Some(2),
            provider: ProviderId::Click,
            return_url: None,
        };

        let response = f.service.create_checkout("u1", &req).unwrap();
        assert_eq!(response.amount, 2_000_000);
    }

    #[test]
    fn test_payment_history_only_settled_orders() {
        let f = fixture(true);
        let response = f.service.create_checkout("u1", &subscription_request()).unwrap();

        // Pending order is invisible in history
        assert!(f.service.payment_history("u1").unwrap().is_empty());

        f.ledger
            .transition(
                &response.order_id,
                OrderStatus::Pending,
                OrderStatus::Completed,
                Some("tx-1"),
            )
            .unwrap();
        let history = f.service.payment_history("u1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].description, "Go Basics Monthly - Monthly");
    }

    #[test]
    fn test_available_providers_reports_configuration() {
        let f = fixture(false);
        let providers = f.service.available_providers();

        assert_eq!(providers.len(), 2);
        let payme = providers.iter().find(|p| p.id == ProviderId::Payme).unwrap();
        assert!(!payme.configured);
        let click = providers.iter().find(|p| p.id == ProviderId::Click).unwrap();
        assert!(click.configured);
    }
}
