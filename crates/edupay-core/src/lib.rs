//! # edupay-core
//!
//! Settlement core for the edupay course platform: the order ledger,
//! pricing resolution, entitlement grants, and checkout orchestration.
//!
//! The platform sells monthly course subscriptions and one-time digital
//! goods (lifetime course access, AI credits, roadmap regeneration) and
//! reconciles its internal order ledger against external payment
//! providers. Providers deliver webhooks at-least-once, so every state
//! change funnels through a single atomic, idempotent transition on the
//! ledger:
//!
//! ```text
//! pending ──▶ completed ──▶ refunded
//!    │
//!    └──────▶ failed
//! ```
//!
//! No other transition is legal. Duplicate deliveries of the same
//! settlement are acknowledged without re-applying side effects, and a
//! webhook claiming a different amount than the ledger recorded is
//! rejected outright.
//!
//! Provider wire formats live in `edupay-providers`; this crate only
//! defines the [`gateway::ProviderGateway`] capability seam they
//! implement.

pub mod audit;
pub mod checkout;
pub mod entitlements;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod order;
pub mod plan;
pub mod pricing;
pub mod settlement;
pub mod subscription;

pub use audit::{AuditEmitter, AuditEvent};
pub use checkout::{CheckoutRequest, CheckoutResponse, CheckoutService, OrderType};
pub use entitlements::{AccessService, CourseAccess, EntitlementStore, MemoryEntitlementStore};
pub use error::{PaymentError, Result};
pub use gateway::ProviderGateway;
pub use ledger::{MemoryOrderLedger, OrderLedger, TransitionOutcome};
pub use order::{Order, OrderStatus, Payment, ProviderId, Purchase, PurchaseType};
pub use plan::{Course, MemoryPlanStore, PlanStore, PlanType, SubscriptionPlan};
pub use pricing::{PricingCatalog, PricingResolver, Quote, format_price};
pub use settlement::{SettleOutcome, SettlementService};
pub use subscription::{
    MemorySubscriptionStore, Subscription, SubscriptionStatus, SubscriptionStore,
    calculate_end_date,
};
