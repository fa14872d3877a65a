//! Order Records
//!
//! A `Payment` settles a subscription period; a `Purchase` settles a
//! one-time good. They are never merged into one table: every API that
//! spans both works through the [`Order`] enum and keeps the kind tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// External payment providers the platform reconciles against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Payme,
    Click,
}

impl ProviderId {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Payme => "payme",
            Self::Click => "click",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Payme => "Payme",
            Self::Click => "Click",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle. `pending` is the only non-terminal-ish state; a
/// completed order may still be refunded by an admin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl OrderStatus {
    /// The full set of legal transitions. Everything else, including
    /// any move out of `failed` or `refunded`, is rejected.
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Failed)
                | (Self::Completed, Self::Refunded)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Settled means the provider (or an admin) has had the last word.
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-time goods sold outside of subscriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseType {
    RoadmapGeneration,
    AiCredits,
    CourseAccess,
}

impl PurchaseType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoadmapGeneration => "roadmap_generation",
            Self::AiCredits => "ai_credits",
            Self::CourseAccess => "course_access",
        }
    }
}

/// A subscription-bound payment. Amount is immutable after creation;
/// only `status` and `provider_tx_id` ever change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub subscription_id: String,
    /// Smallest currency unit (tiyn: 1 UZS = 100 tiyn)
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub provider: ProviderId,
    /// Provider-side transaction id, set once the provider confirms
    pub provider_tx_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A one-time purchase, bound to a user rather than a subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub user_id: String,
    pub purchase_type: PurchaseType,
    pub quantity: u32,
    /// Smallest currency unit
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub provider: ProviderId,
    pub provider_tx_id: Option<String>,
    /// Opaque key/value payload, e.g. the target course for
    /// `course_access`
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Umbrella over the two concrete order kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Order {
    Payment(Payment),
    Purchase(Purchase),
}

impl Order {
    pub fn id(&self) -> &str {
        match self {
            Self::Payment(p) => &p.id,
            Self::Purchase(p) => &p.id,
        }
    }

    pub const fn amount(&self) -> i64 {
        match self {
            Self::Payment(p) => p.amount,
            Self::Purchase(p) => p.amount,
        }
    }

    pub fn currency(&self) -> &str {
        match self {
            Self::Payment(p) => &p.currency,
            Self::Purchase(p) => &p.currency,
        }
    }

    pub const fn status(&self) -> OrderStatus {
        match self {
            Self::Payment(p) => p.status,
            Self::Purchase(p) => p.status,
        }
    }

    pub const fn provider(&self) -> ProviderId {
        match self {
            Self::Payment(p) => p.provider,
            Self::Purchase(p) => p.provider,
        }
    }

    pub fn provider_tx_id(&self) -> Option<&str> {
        match self {
            Self::Payment(p) => p.provider_tx_id.as_deref(),
            Self::Purchase(p) => p.provider_tx_id.as_deref(),
        }
    }

    /// Kind tag as exposed on the status API.
    pub const fn order_type(&self) -> &'static str {
        match self {
            Self::Payment(_) => "subscription",
            Self::Purchase(_) => "purchase",
        }
    }

    pub(crate) fn set_status(&mut self, status: OrderStatus) {
        match self {
            Self::Payment(p) => {
                p.status = status;
                p.updated_at = Utc::now();
            }
            Self::Purchase(p) => p.status = status,
        }
    }

    pub(crate) fn set_provider_tx(&mut self, tx_id: &str) {
        match self {
            Self::Payment(p) => p.provider_tx_id = Some(tx_id.to_string()),
            Self::Purchase(p) => p.provider_tx_id = Some(tx_id.to_string()),
        }
    }
}

/// Summary returned by the order status API.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusInfo {
    pub status: OrderStatus,
    pub order_type: &'static str,
    pub amount: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use OrderStatus::{Completed, Failed, Pending, Refunded};

        assert!(Pending.can_transition(Completed));
        assert!(Pending.can_transition(Failed));
        assert!(Completed.can_transition(Refunded));
    }

    #[test]
    fn test_illegal_transitions() {
        use OrderStatus::{Completed, Failed, Pending, Refunded};

        assert!(!Pending.can_transition(Refunded));
        assert!(!Completed.can_transition(Pending));
        assert!(!Completed.can_transition(Failed));
        assert!(!Failed.can_transition(Completed));
        assert!(!Failed.can_transition(Pending));
        assert!(!Refunded.can_transition(Completed));
        assert!(!Refunded.can_transition(Pending));
    }

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&PurchaseType::CourseAccess).unwrap(),
            "\"course_access\""
        );
        assert_eq!(
            serde_json::to_string(&ProviderId::Payme).unwrap(),
            "\"payme\""
        );
    }
}
