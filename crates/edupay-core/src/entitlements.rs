//! Entitlements
//!
//! Durable access rights granted after settlement: lifetime course
//! access, AI credit balances, purchased roadmap generations, and
//! (via the subscription store) active subscriptions. All grants are
//! idempotent upserts so a retried settlement never double-credits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::plan::{PlanStore, PlanType};
use crate::subscription::SubscriptionStore;

/// One user's access to one course. `expires_at = None` is lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CourseAccess {
    pub user_id: String,
    pub course_id: String,
    /// Back-reference to the purchase that granted this, not ownership
    pub purchase_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CourseAccess {
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|e| e >= now)
    }
}

/// Roadmap generation budget: everyone gets one free generation, the
/// rest are purchased.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapCredits {
    pub used: u32,
    pub available: u32,
    pub can_generate: bool,
}

/// Entitlement storage contract.
pub trait EntitlementStore: Send + Sync {
    /// Upsert course access as lifetime. Re-granting refreshes the
    /// purchase back-reference and clears any expiry.
    fn grant_course_access(&self, user_id: &str, course_id: &str, purchase_id: &str)
    -> Result<()>;

    fn course_access(&self, user_id: &str, course_id: &str) -> Result<Option<CourseAccess>>;

    /// Unexpired accesses for a user, newest first.
    fn course_accesses(&self, user_id: &str) -> Result<Vec<CourseAccess>>;

    /// Credit purchased roadmap generations; returns the new total.
    fn add_roadmap_generations(&self, user_id: &str, count: u32) -> Result<u32>;

    fn purchased_roadmap_generations(&self, user_id: &str) -> Result<u32>;

    /// Record one consumed generation (called by the roadmap wizard).
    fn mark_roadmap_used(&self, user_id: &str) -> Result<u32>;

    fn used_roadmap_generations(&self, user_id: &str) -> Result<u32>;

    /// Credit AI credits; returns the new balance.
    fn add_ai_credits(&self, user_id: &str, credits: u32) -> Result<u32>;

    fn ai_credits(&self, user_id: &str) -> Result<u32>;
}

/// In-memory entitlement store (for development and tests)
pub struct MemoryEntitlementStore {
    accesses: RwLock<HashMap<(String, String), CourseAccess>>,
    roadmap_purchased: RwLock<HashMap<String, u32>>,
    roadmap_used: RwLock<HashMap<String, u32>>,
    ai_credits: RwLock<HashMap<String, u32>>,
}

impl Default for MemoryEntitlementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self {
            accesses: RwLock::new(HashMap::new()),
            roadmap_purchased: RwLock::new(HashMap::new()),
            roadmap_used: RwLock::new(HashMap::new()),
            ai_credits: RwLock::new(HashMap::new()),
        }
    }
}

fn bump(map: &RwLock<HashMap<String, u32>>, user_id: &str, by: u32) -> u32 {
    let mut map = map.write().unwrap();
    let counter = map.entry(user_id.to_string()).or_insert(0);
    *counter += by;
    *counter
}

fn read(map: &RwLock<HashMap<String, u32>>, user_id: &str) -> u32 {
    map.read().unwrap().get(user_id).copied().unwrap_or(0)
}

impl EntitlementStore for MemoryEntitlementStore {
    fn grant_course_access(
        &self,
        user_id: &str,
        course_id: &str,
        purchase_id: &str,
    ) -> Result<()> {
        let key = (user_id.to_string(), course_id.to_string());
        let mut accesses = self.accesses.write().unwrap();

        accesses
            .entry(key)
            .and_modify(|access| {
                access.purchase_id = purchase_id.to_string();
                access.expires_at = None;
            })
            .or_insert_with(|| CourseAccess {
                user_id: user_id.to_string(),
                course_id: course_id.to_string(),
                purchase_id: purchase_id.to_string(),
                expires_at: None,
                created_at: Utc::now(),
            });
        Ok(())
    }

    fn course_access(&self, user_id: &str, course_id: &str) -> Result<Option<CourseAccess>> {
        Ok(self
            .accesses
            .read()
            .unwrap()
            .get(&(user_id.to_string(), course_id.to_string()))
            .cloned())
    }

    fn course_accesses(&self, user_id: &str) -> Result<Vec<CourseAccess>> {
        let now = Utc::now();
        let mut accesses: Vec<CourseAccess> = self
            .accesses
            .read()
            .unwrap()
            .values()
            .filter(|a| a.user_id == user_id && a.is_current(now))
            .cloned()
            .collect();
        accesses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(accesses)
    }

    fn add_roadmap_generations(&self, user_id: &str, count: u32) -> Result<u32> {
        Ok(bump(&self.roadmap_purchased, user_id, count))
    }

    fn purchased_roadmap_generations(&self, user_id: &str) -> Result<u32> {
        Ok(read(&self.roadmap_purchased, user_id))
    }

    fn mark_roadmap_used(&self, user_id: &str) -> Result<u32> {
        Ok(bump(&self.roadmap_used, user_id, 1))
    }

    fn used_roadmap_generations(&self, user_id: &str) -> Result<u32> {
        Ok(read(&self.roadmap_used, user_id))
    }

    fn add_ai_credits(&self, user_id: &str, credits: u32) -> Result<u32> {
        Ok(bump(&self.ai_credits, user_id, credits))
    }

    fn ai_credits(&self, user_id: &str) -> Result<u32> {
        Ok(read(&self.ai_credits, user_id))
    }
}

/// Answers "does this user currently have this course?" across both
/// grant mechanisms: a CourseAccess row first, then coverage by an
/// active subscription (global plan, or the course's own plan).
#[derive(Clone)]
pub struct AccessService {
    entitlements: Arc<dyn EntitlementStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    plans: Arc<dyn PlanStore>,
}

impl AccessService {
    pub fn new(
        entitlements: Arc<dyn EntitlementStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        plans: Arc<dyn PlanStore>,
    ) -> Self {
        Self {
            entitlements,
            subscriptions,
            plans,
        }
    }

    pub fn user_has_course_access(&self, user_id: &str, course_id: &str) -> Result<bool> {
        if let Some(access) = self.entitlements.course_access(user_id, course_id)? {
            if access.is_current(Utc::now()) {
                return Ok(true);
            }
        }

        for subscription in self.subscriptions.active_for_user(user_id)? {
            let Some(plan) = self.plans.get_plan(&subscription.plan_id)? else {
                continue;
            };
            match plan.plan_type {
                PlanType::Global => return Ok(true),
                PlanType::Course if plan.course_id.as_deref() == Some(course_id) => {
                    return Ok(true);
                }
                PlanType::Course => {}
            }
        }
        Ok(false)
    }

    /// Roadmap budget: 1 free generation plus whatever was purchased.
    pub fn roadmap_credits(&self, user_id: &str) -> Result<RoadmapCredits> {
        let free = 1;
        let purchased = self.entitlements.purchased_roadmap_generations(user_id)?;
        let used = self.entitlements.used_roadmap_generations(user_id)?;
        let available = free + purchased;

        Ok(RoadmapCredits {
            used,
            available,
            can_generate: used < available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Course, MemoryPlanStore, SubscriptionPlan};
    use crate::subscription::MemorySubscriptionStore;

    fn access_fixture() -> (
        Arc<MemoryEntitlementStore>,
        Arc<MemorySubscriptionStore>,
        Arc<MemoryPlanStore>,
        AccessService,
    ) {
        let entitlements = Arc::new(MemoryEntitlementStore::new());
        let subscriptions = Arc::new(MemorySubscriptionStore::new());
        let plans = Arc::new(MemoryPlanStore::new());
        plans.add_course(Course {
            id: "c1".into(),
            slug: "go-basics".into(),
            title: "Go Basics".into(),
        });
        let service = AccessService::new(
            entitlements.clone(),
            subscriptions.clone(),
            plans.clone(),
        );
        (entitlements, subscriptions, plans, service)
    }

    #[test]
    fn test_grant_is_idempotent_and_lifetime() {
        let (entitlements, _, _, service) = access_fixture();

        assert!(!service.user_has_course_access("u1", "c1").unwrap());

        entitlements
            .grant_course_access("u1", "c1", "purchase-1")
            .unwrap();
        entitlements
            .grant_course_access("u1", "c1", "purchase-2")
            .unwrap();

        let access = entitlements.course_access("u1", "c1").unwrap().unwrap();
        assert_eq!(access.purchase_id, "purchase-2");
        assert!(access.expires_at.is_none());
        assert_eq!(entitlements.course_accesses("u1").unwrap().len(), 1);
        assert!(service.user_has_course_access("u1", "c1").unwrap());
    }

    #[test]
    fn test_global_subscription_covers_any_course() {
        let (_, subscriptions, plans, service) = access_fixture();
        plans.add_plan(SubscriptionPlan {
            id: "p-global".into(),
            slug: "premium".into(),
            name: "Premium".into(),
            plan_type: PlanType::Global,
            course_id: None,
            price_monthly: 500_000,
            currency: "UZS".into(),
            is_active: true,
        });

        let sub = subscriptions.upsert_pending("u1", "p-global").unwrap();
        assert!(!service.user_has_course_access("u1", "c1").unwrap());

        subscriptions.activate(&sub.id).unwrap();
        assert!(service.user_has_course_access("u1", "c1").unwrap());
    }

    #[test]
    fn test_course_subscription_covers_only_its_course() {
        let (_, subscriptions, plans, service) = access_fixture();
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

        let sub = subscriptions.upsert_pending("u1", "p1").unwrap();
        subscriptions.activate(&sub.id).unwrap();

        assert!(service.user_has_course_access("u1", "c1").unwrap());
        assert!(!service.user_has_course_access("u1", "c2").unwrap());
    }

    #[test]
    fn test_roadmap_credits_include_one_free() {
        let (entitlements, _, _, service) = access_fixture();

        let credits = service.roadmap_credits("u1").unwrap();
        assert_eq!(credits.available, 1);
        assert!(credits.can_generate);

        entitlements.mark_roadmap_used("u1").unwrap();
        let credits = service.roadmap_credits("u1").unwrap();
        assert_eq!(credits.used, 1);
        assert!(!credits.can_generate);

        entitlements.add_roadmap_generations("u1", 2).unwrap();
        let credits = service.roadmap_credits("u1").unwrap();
        assert_eq!(credits.available, 3);
        assert!(credits.can_generate);
    }
}
