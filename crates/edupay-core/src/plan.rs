//! Subscription Plans & Courses
//!
//! Plans carry the authoritative monthly price. A `course` plan is
//! scoped to one course; a `global` plan covers the whole catalog.
//! Only active plans are purchasable or used for pricing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::Result;

/// Plan scope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Global,
    Course,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub plan_type: PlanType,
    /// Set iff `plan_type` is `Course`
    pub course_id: Option<String>,
    /// Authoritative monthly price, smallest currency unit
    pub price_monthly: i64,
    pub currency: String,
    pub is_active: bool,
}

/// Minimal course record: the settlement core only needs identity and
/// display fields for descriptions and the pricing catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub slug: String,
    pub title: String,
}

/// Read access to the plan/course catalog.
pub trait PlanStore: Send + Sync {
    fn get_plan(&self, plan_id: &str) -> Result<Option<SubscriptionPlan>>;

    /// The active `course`-scoped plan for a course, if any.
    fn active_course_plan(&self, course_id: &str) -> Result<Option<SubscriptionPlan>>;

    fn get_course(&self, course_id: &str) -> Result<Option<Course>>;

    fn courses(&self) -> Result<Vec<Course>>;
}

/// In-memory catalog (for development and tests)
pub struct MemoryPlanStore {
    plans: RwLock<HashMap<String, SubscriptionPlan>>,
    courses: RwLock<HashMap<String, Course>>,
}

impl Default for MemoryPlanStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
            courses: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_plan(&self, plan: SubscriptionPlan) {
        self.plans.write().unwrap().insert(plan.id.clone(), plan);
    }

    pub fn add_course(&self, course: Course) {
        self.courses
            .write()
            .unwrap()
            .insert(course.id.clone(), course);
    }
}

impl PlanStore for MemoryPlanStore {
    fn get_plan(&self, plan_id: &str) -> Result<Option<SubscriptionPlan>> {
        Ok(self.plans.read().unwrap().get(plan_id).cloned())
    }

    fn active_course_plan(&self, course_id: &str) -> Result<Option<SubscriptionPlan>> {
        Ok(self
            .plans
            .read()
            .unwrap()
            .values()
            .find(|p| {
                p.is_active
                    && p.plan_type == PlanType::Course
                    && p.course_id.as_deref() == Some(course_id)
            })
            .cloned())
    }

    fn get_course(&self, course_id: &str) -> Result<Option<Course>> {
        Ok(self.courses.read().unwrap().get(course_id).cloned())
    }

    fn courses(&self) -> Result<Vec<Course>> {
        let mut courses: Vec<Course> = self.courses.read().unwrap().values().cloned().collect();
        courses.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(courses)
    }
}
