//! Settlement Service
//!
//! The single path from a verified provider event (or an admin refund)
//! to a ledger transition and its follow-on entitlement grant. Provider
//! gateways decode and validate but never mutate state themselves —
//! they delegate here, so both providers exercise identical transition
//! logic.

use std::sync::Arc;

use crate::audit::AuditEmitter;
use crate::entitlements::EntitlementStore;
use crate::error::{PaymentError, Result};
use crate::ledger::{OrderLedger, TransitionOutcome};
use crate::order::{Order, OrderStatus, ProviderId, PurchaseType};
use crate::pricing::AI_CREDITS_BATCH;
use crate::subscription::SubscriptionStore;

/// Settlement result as seen by a webhook handler. A duplicate is a
/// success — providers retry until acknowledged.
#[derive(Clone, Debug)]
pub enum SettleOutcome {
    Applied(Order),
    Duplicate(Order),
}

impl SettleOutcome {
    pub const fn order(&self) -> &Order {
        match self {
            Self::Applied(o) | Self::Duplicate(o) => o,
        }
    }
}

pub struct SettlementService {
    ledger: Arc<dyn OrderLedger>,
    subscriptions: Arc<dyn SubscriptionStore>,
    entitlements: Arc<dyn EntitlementStore>,
    audit: AuditEmitter,
}

impl SettlementService {
    pub fn new(
        ledger: Arc<dyn OrderLedger>,
        subscriptions: Arc<dyn SubscriptionStore>,
        entitlements: Arc<dyn EntitlementStore>,
        audit: AuditEmitter,
    ) -> Self {
        Self {
            ledger,
            subscriptions,
            entitlements,
            audit,
        }
    }

    pub fn order(&self, order_id: &str) -> Result<Option<Order>> {
        self.ledger.get(order_id)
    }

    pub fn order_by_provider_tx(
        &self,
        provider: ProviderId,
        tx_id: &str,
    ) -> Result<Option<Order>> {
        self.ledger.get_by_provider_tx(provider, tx_id)
    }

    pub fn attach_provider_tx(&self, order_id: &str, tx_id: &str) -> Result<Order> {
        self.ledger.set_provider_tx(order_id, tx_id)
    }

    /// A webhook claiming a different amount than the ledger recorded
    /// is either a bug or a fraud attempt. Hard failure, audited,
    /// never retried automatically.
    pub fn verify_amount(&self, order: &Order, claimed: i64) -> Result<()> {
        if claimed == order.amount() {
            return Ok(());
        }

        let detail = format!(
            "claimed amount {claimed} does not match recorded amount {}",
            order.amount()
        );
        tracing::warn!(order_id = order.id(), %detail, "amount mismatch");
        self.audit
            .emit("order.amount_mismatch", Some(order.id()), detail.clone());
        Err(PaymentError::rejected(order.id(), detail))
    }

    /// `pending -> completed`. On a fresh transition entitlements are
    /// granted; on a duplicate nothing is re-applied.
    pub fn complete(&self, order_id: &str, provider_tx_id: Option<&str>) -> Result<SettleOutcome> {
        let outcome =
            self.transition(order_id, OrderStatus::Pending, OrderStatus::Completed, provider_tx_id)?;

        match outcome {
            TransitionOutcome::Applied(order) => {
                self.grant_entitlements(&order);
                self.audit.emit(
                    "order.completed",
                    Some(order.id()),
                    format!("settled via {}", order.provider()),
                );
                Ok(SettleOutcome::Applied(order))
            }
            TransitionOutcome::AlreadyInTarget(order) => {
                tracing::info!(order_id, "duplicate completion acknowledged");
                self.audit
                    .emit("order.duplicate", Some(order.id()), "already completed");
                Ok(SettleOutcome::Duplicate(order))
            }
        }
    }

    /// `pending -> failed`.
    pub fn fail(&self, order_id: &str, provider_tx_id: Option<&str>) -> Result<SettleOutcome> {
        let outcome =
            self.transition(order_id, OrderStatus::Pending, OrderStatus::Failed, provider_tx_id)?;

        match outcome {
            TransitionOutcome::Applied(order) => {
                self.audit.emit(
                    "order.failed",
                    Some(order.id()),
                    format!("failed via {}", order.provider()),
                );
                Ok(SettleOutcome::Applied(order))
            }
            TransitionOutcome::AlreadyInTarget(order) => {
                self.audit
                    .emit("order.duplicate", Some(order.id()), "already failed");
                Ok(SettleOutcome::Duplicate(order))
            }
        }
    }

    /// `completed -> refunded`. Callers decide how to treat a
    /// duplicate: admin refunds reject it, provider cancel retries
    /// acknowledge it.
    pub fn refund(&self, order_id: &str, reason: &str) -> Result<SettleOutcome> {
        let outcome =
            self.transition(order_id, OrderStatus::Completed, OrderStatus::Refunded, None)?;

        match outcome {
            TransitionOutcome::Applied(order) => {
                self.audit
                    .emit("order.refunded", Some(order.id()), reason.to_string());
                Ok(SettleOutcome::Applied(order))
            }
            TransitionOutcome::AlreadyInTarget(order) => {
                self.audit
                    .emit("order.duplicate", Some(order.id()), "already refunded");
                Ok(SettleOutcome::Duplicate(order))
            }
        }
    }

    fn transition(
        &self,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
        provider_tx_id: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let result = self.ledger.transition(order_id, from, to, provider_tx_id);

        if let Err(PaymentError::TransitionRejected { detail, .. }) = &result {
            tracing::warn!(order_id, %detail, "transition rejected");
            self.audit
                .emit("order.transition_rejected", Some(order_id), detail.clone());
        }
        result
    }

    /// Best effort: a failing grant is logged and audited, but the
    /// completed transition stands. A background reconciliation pass
    /// (external collaborator) re-grants from the ledger.
    fn grant_entitlements(&self, order: &Order) {
        let result = match order {
            Order::Payment(payment) => self
                .subscriptions
                .activate(&payment.subscription_id)
                .map(|_| ()),
            Order::Purchase(purchase) => match purchase.purchase_type {
                PurchaseType::CourseAccess => match purchase.metadata.get("courseId") {
                    Some(course_id) => self.entitlements.grant_course_access(
                        &purchase.user_id,
                        course_id,
                        &purchase.id,
                    ),
                    None => Err(PaymentError::Storage(format!(
                        "purchase {} has no courseId metadata",
                        purchase.id
                    ))),
                },
                PurchaseType::RoadmapGeneration => self
                    .entitlements
                    .add_roadmap_generations(&purchase.user_id, purchase.quantity)
                    .map(|_| ()),
                PurchaseType::AiCredits => self
                    .entitlements
                    .add_ai_credits(&purchase.user_id, AI_CREDITS_BATCH * purchase.quantity)
                    .map(|_| ()),
            },
        };

        if let Err(e) = result {
            tracing::error!(order_id = order.id(), error = %e, "entitlement grant failed");
            self.audit.emit(
                "entitlement.grant_failed",
                Some(order.id()),
                e.to_string(),
            );
        }
    }
}
