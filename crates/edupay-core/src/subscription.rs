//! Subscriptions
//!
//! One row per `(user, plan)` pair: re-purchasing a plan resets the
//! existing subscription to `pending` instead of creating a second row.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{PaymentError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub auto_renew: bool,
}

/// One calendar month from `from`, clamped to the end of the target
/// month: Jan 31 + 1 month is Feb 28 (or 29), never Mar 3.
pub fn calculate_end_date(from: DateTime<Utc>) -> DateTime<Utc> {
    from.checked_add_months(Months::new(1)).unwrap_or(from)
}

/// Subscription storage contract.
pub trait SubscriptionStore: Send + Sync {
    /// Create the subscription for `(user, plan)` or reset the
    /// existing one to `pending`.
    fn upsert_pending(&self, user_id: &str, plan_id: &str) -> Result<Subscription>;

    fn get(&self, subscription_id: &str) -> Result<Option<Subscription>>;

    /// Activate after settlement: status `active`, fresh period end.
    fn activate(&self, subscription_id: &str) -> Result<Subscription>;

    /// Admin op: push the period end out by whole days.
    fn extend(&self, subscription_id: &str, days: i64) -> Result<Subscription>;

    /// Admin op: cancel.
    fn cancel(&self, subscription_id: &str) -> Result<Subscription>;

    /// All subscriptions for a user, any status.
    fn for_user(&self, user_id: &str) -> Result<Vec<Subscription>>;

    /// Currently active (status `active`, period not over) for a user.
    fn active_for_user(&self, user_id: &str) -> Result<Vec<Subscription>>;
}

/// In-memory subscription store (for development and tests)
pub struct MemorySubscriptionStore {
    subscriptions: RwLock<HashMap<String, Subscription>>,
    by_user_plan: RwLock<HashMap<(String, String), String>>,
}

impl Default for MemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            by_user_plan: RwLock::new(HashMap::new()),
        }
    }

    fn update<F>(&self, subscription_id: &str, apply: F) -> Result<Subscription>
    where
        F: FnOnce(&mut Subscription),
    {
        let mut subscriptions = self.subscriptions.write().unwrap();
        let subscription = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| PaymentError::NotFound(format!("subscription {subscription_id}")))?;
        apply(subscription);
        Ok(subscription.clone())
    }
}

impl SubscriptionStore for MemorySubscriptionStore {
    fn upsert_pending(&self, user_id: &str, plan_id: &str) -> Result<Subscription> {
        let key = (user_id.to_string(), plan_id.to_string());
        let existing_id = self.by_user_plan.read().unwrap().get(&key).cloned();

        if let Some(id) = existing_id {
            return self.update(&id, |s| s.status = SubscriptionStatus::Pending);
        }

        let now = Utc::now();
        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            plan_id: plan_id.to_string(),
            status: SubscriptionStatus::Pending,
            start_date: now,
            end_date: calculate_end_date(now),
            auto_renew: false,
        };

        self.by_user_plan
            .write()
            .unwrap()
            .insert(key, subscription.id.clone());
        self.subscriptions
            .write()
            .unwrap()
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    fn get(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .unwrap()
            .get(subscription_id)
            .cloned())
    }

    fn activate(&self, subscription_id: &str) -> Result<Subscription> {
        let now = Utc::now();
        self.update(subscription_id, |s| {
            s.status = SubscriptionStatus::Active;
            s.start_date = now;
            s.end_date = calculate_end_date(now);
        })
    }

    fn extend(&self, subscription_id: &str, days: i64) -> Result<Subscription> {
        self.update(subscription_id, |s| {
            s.end_date += Duration::days(days);
        })
    }

    fn cancel(&self, subscription_id: &str) -> Result<Subscription> {
        self.update(subscription_id, |s| {
            s.status = SubscriptionStatus::Cancelled;
        })
    }

    fn for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    fn active_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        let now = Utc::now();
        Ok(self
            .subscriptions
            .read()
            .unwrap()
            .values()
            .filter(|s| {
                s.user_id == user_id
                    && s.status == SubscriptionStatus::Active
                    && s.end_date >= now
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_end_of_month_clamp() {
        let jan31 = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let end = calculate_end_date(jan31);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_end_of_month_clamp_leap_year() {
        let jan31 = Utc.with_ymd_and_hms(2028, 1, 31, 12, 0, 0).unwrap();
        let end = calculate_end_date(jan31);
        assert_eq!(end, Utc.with_ymd_and_hms(2028, 2, 29, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_plain_month_addition() {
        let mar15 = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
        let end = calculate_end_date(mar15);
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 4, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_repurchase_reuses_subscription_row() {
        let store = MemorySubscriptionStore::new();
        let first = store.upsert_pending("u1", "p1").unwrap();
        store.activate(&first.id).unwrap();

        let second = store.upsert_pending("u1", "p1").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, SubscriptionStatus::Pending);
    }

    #[test]
    fn test_cancelled_subscription_not_active() {
        let store = MemorySubscriptionStore::new();
        let sub = store.upsert_pending("u1", "p1").unwrap();
        store.activate(&sub.id).unwrap();
        assert_eq!(store.active_for_user("u1").unwrap().len(), 1);

        store.cancel(&sub.id).unwrap();
        assert!(store.active_for_user("u1").unwrap().is_empty());
    }

    #[test]
    fn test_extend_pushes_end_date() {
        let store = MemorySubscriptionStore::new();
        let sub = store.upsert_pending("u1", "p1").unwrap();
        let before = store.get(&sub.id).unwrap().unwrap().end_date;

        let extended = store.extend(&sub.id, 10).unwrap();
        assert_eq!(extended.end_date - before, Duration::days(10));
    }
}
