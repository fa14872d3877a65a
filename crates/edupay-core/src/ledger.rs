//! Order Ledger
//!
//! The only writer of settlement status. Providers deliver webhooks
//! at-least-once and concurrently, so [`OrderLedger::transition`] is a
//! single conditional update: re-delivery of an already-applied
//! settlement is acknowledged without side effects, and any other
//! mismatch between expected and current status rejects without
//! mutating.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{PaymentError, Result};
use crate::order::{
    Order, OrderStatus, OrderStatusInfo, Payment, ProviderId, Purchase, PurchaseType,
};

/// Result of a conditional transition.
#[derive(Clone, Debug)]
pub enum TransitionOutcome {
    /// Status moved; side effects (entitlements, audit) are due.
    Applied(Order),
    /// Order was already in the target state — duplicate delivery.
    AlreadyInTarget(Order),
}

impl TransitionOutcome {
    pub const fn order(&self) -> &Order {
        match self {
            Self::Applied(o) | Self::AlreadyInTarget(o) => o,
        }
    }

    pub const fn was_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Ledger storage contract. Implementations must make `transition` an
/// atomic compare-and-swap on the order's status; under multiple
/// processes that means a conditional write at the persistence layer.
pub trait OrderLedger: Send + Sync {
    /// Create a `pending` payment bound to a subscription.
    fn create_payment(
        &self,
        subscription_id: &str,
        amount: i64,
        currency: &str,
        provider: ProviderId,
    ) -> Result<Payment>;

    /// Create a `pending` one-time purchase.
    #[allow(clippy::too_many_arguments)]
    fn create_purchase(
        &self,
        user_id: &str,
        purchase_type: PurchaseType,
        quantity: u32,
        amount: i64,
        currency: &str,
        provider: ProviderId,
        metadata: HashMap<String, String>,
    ) -> Result<Purchase>;

    /// Look up either order kind by id.
    fn get(&self, order_id: &str) -> Result<Option<Order>>;

    /// Look up an order by the provider-side transaction id.
    fn get_by_provider_tx(&self, provider: ProviderId, tx_id: &str) -> Result<Option<Order>>;

    /// Attach the provider transaction id. Set-once: attaching a
    /// different id to the same order is a conflict.
    fn set_provider_tx(&self, order_id: &str, tx_id: &str) -> Result<Order>;

    /// Atomic, idempotent conditional status update.
    fn transition(
        &self,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
        provider_tx_id: Option<&str>,
    ) -> Result<TransitionOutcome>;

    /// Status summary for the public status endpoint.
    fn status(&self, order_id: &str) -> Result<OrderStatusInfo>;

    /// Payments recorded against one subscription, newest first.
    fn payments_for_subscription(&self, subscription_id: &str) -> Result<Vec<Payment>>;

    /// Purchases recorded for one user, newest first.
    fn purchases_for_user(&self, user_id: &str) -> Result<Vec<Purchase>>;
}

/// In-memory ledger. The CAS in `transition` is guarded by one write
/// lock, which is sufficient for a single process; the trait is the
/// seam for a database-backed implementation.
pub struct MemoryOrderLedger {
    orders: RwLock<HashMap<String, Order>>,
    by_provider_tx: RwLock<HashMap<(ProviderId, String), String>>,
}

impl Default for MemoryOrderLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOrderLedger {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            by_provider_tx: RwLock::new(HashMap::new()),
        }
    }
}

impl OrderLedger for MemoryOrderLedger {
    fn create_payment(
        &self,
        subscription_id: &str,
        amount: i64,
        currency: &str,
        provider: ProviderId,
    ) -> Result<Payment> {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            subscription_id: subscription_id.to_string(),
            amount,
            currency: currency.to_string(),
            status: OrderStatus::Pending,
            provider,
            provider_tx_id: None,
            created_at: now,
            updated_at: now,
        };

        let mut orders = self.orders.write().unwrap();
        orders.insert(payment.id.clone(), Order::Payment(payment.clone()));
        Ok(payment)
    }

    fn create_purchase(
        &self,
        user_id: &str,
        purchase_type: PurchaseType,
        quantity: u32,
        amount: i64,
        currency: &str,
        provider: ProviderId,
        metadata: HashMap<String, String>,
    ) -> Result<Purchase> {
        let purchase = Purchase {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            purchase_type,
            quantity,
            amount,
            currency: currency.to_string(),
            status: OrderStatus::Pending,
            provider,
            provider_tx_id: None,
            metadata,
            created_at: Utc::now(),
        };

        let mut orders = self.orders.write().unwrap();
        orders.insert(purchase.id.clone(), Order::Purchase(purchase.clone()));
        Ok(purchase)
    }

    fn get(&self, order_id: &str) -> Result<Option<Order>> {
        let orders = self.orders.read().unwrap();
        Ok(orders.get(order_id).cloned())
    }

    fn get_by_provider_tx(&self, provider: ProviderId, tx_id: &str) -> Result<Option<Order>> {
        // Index lock released before touching the orders map; writers
        // take the locks in the opposite order.
        let order_id = {
            let index = self.by_provider_tx.read().unwrap();
            index.get(&(provider, tx_id.to_string())).cloned()
        };
        let Some(order_id) = order_id else {
            return Ok(None);
        };

        let orders = self.orders.read().unwrap();
        Ok(orders.get(&order_id).cloned())
    }

    fn set_provider_tx(&self, order_id: &str, tx_id: &str) -> Result<Order> {
        let mut orders = self.orders.write().unwrap();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| PaymentError::NotFound(format!("order {order_id}")))?;

        match order.provider_tx_id() {
            Some(existing) if existing != tx_id => {
                return Err(PaymentError::Conflict(format!(
                    "order {order_id} already bound to transaction {existing}"
                )));
            }
            Some(_) => return Ok(order.clone()),
            None => {}
        }

        order.set_provider_tx(tx_id);
        self.by_provider_tx
            .write()
            .unwrap()
            .insert((order.provider(), tx_id.to_string()), order_id.to_string());
        Ok(order.clone())
    }

    fn transition(
        &self,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
        provider_tx_id: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let mut orders = self.orders.write().unwrap();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| PaymentError::NotFound(format!("order {order_id}")))?;

        let current = order.status();
        if current == to {
            return Ok(TransitionOutcome::AlreadyInTarget(order.clone()));
        }
        if current != from || !current.can_transition(to) {
            return Err(PaymentError::rejected(
                order_id,
                format!("{current} -> {to} (expected from {from})"),
            ));
        }

        order.set_status(to);
        if let Some(tx_id) = provider_tx_id {
            if order.provider_tx_id().is_none() {
                order.set_provider_tx(tx_id);
                self.by_provider_tx
                    .write()
                    .unwrap()
                    .insert((order.provider(), tx_id.to_string()), order_id.to_string());
            }
        }
        Ok(TransitionOutcome::Applied(order.clone()))
    }

    fn status(&self, order_id: &str) -> Result<OrderStatusInfo> {
        let orders = self.orders.read().unwrap();
        let order = orders
            .get(order_id)
            .ok_or_else(|| PaymentError::NotFound(format!("order {order_id}")))?;

        Ok(OrderStatusInfo {
            status: order.status(),
            order_type: order.order_type(),
            amount: order.amount(),
        })
    }

    fn payments_for_subscription(&self, subscription_id: &str) -> Result<Vec<Payment>> {
        let orders = self.orders.read().unwrap();
        let mut payments: Vec<Payment> = orders
            .values()
            .filter_map(|o| match o {
                Order::Payment(p) if p.subscription_id == subscription_id => Some(p.clone()),
                _ => None,
            })
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    fn purchases_for_user(&self, user_id: &str) -> Result<Vec<Purchase>> {
        let orders = self.orders.read().unwrap();
        let mut purchases: Vec<Purchase> = orders
            .values()
            .filter_map(|o| match o {
                Order::Purchase(p) if p.user_id == user_id => Some(p.clone()),
                _ => None,
            })
            .collect();
        purchases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(purchases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_payment(ledger: &MemoryOrderLedger) -> Payment {
        ledger
            .create_payment("sub-1", 150_000, "UZS", ProviderId::Payme)
            .unwrap()
    }

    #[test]
    fn test_complete_then_duplicate_is_idempotent() {
        let ledger = MemoryOrderLedger::new();
        let payment = pending_payment(&ledger);

        let first = ledger
            .transition(
                &payment.id,
                OrderStatus::Pending,
                OrderStatus::Completed,
                Some("tx-1"),
            )
            .unwrap();
        assert!(first.was_applied());

        let second = ledger
            .transition(
                &payment.id,
                OrderStatus::Pending,
                OrderStatus::Completed,
                Some("tx-1"),
            )
            .unwrap();
        assert!(!second.was_applied());
        assert_eq!(second.order().status(), OrderStatus::Completed);
    }

    #[test]
    fn test_illegal_transition_rejected_without_mutation() {
        let ledger = MemoryOrderLedger::new();
        let payment = pending_payment(&ledger);

        // pending -> refunded is never legal
        let err = ledger
            .transition(
                &payment.id,
                OrderStatus::Pending,
                OrderStatus::Refunded,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, PaymentError::TransitionRejected { .. }));

        let status = ledger.status(&payment.id).unwrap();
        assert_eq!(status.status, OrderStatus::Pending);
    }

    #[test]
    fn test_stale_expectation_rejected() {
        let ledger = MemoryOrderLedger::new();
        let payment = pending_payment(&ledger);

        ledger
            .transition(
                &payment.id,
                OrderStatus::Pending,
                OrderStatus::Failed,
                None,
            )
            .unwrap();

        // A late completion webhook still believes the order is pending.
        let err = ledger
            .transition(
                &payment.id,
                OrderStatus::Pending,
                OrderStatus::Completed,
                Some("tx-1"),
            )
            .unwrap_err();
        assert!(matches!(err, PaymentError::TransitionRejected { .. }));
        assert_eq!(
            ledger.status(&payment.id).unwrap().status,
            OrderStatus::Failed
        );
    }

    #[test]
    fn test_provider_tx_is_set_once() {
        let ledger = MemoryOrderLedger::new();
        let payment = pending_payment(&ledger);

        ledger.set_provider_tx(&payment.id, "tx-1").unwrap();
        // Re-attaching the same id is fine
        ledger.set_provider_tx(&payment.id, "tx-1").unwrap();
        // A different id is not
        assert!(matches!(
            ledger.set_provider_tx(&payment.id, "tx-2"),
            Err(PaymentError::Conflict(_))
        ));

        let found = ledger
            .get_by_provider_tx(ProviderId::Payme, "tx-1")
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), payment.id);
    }

    #[test]
    fn test_status_distinguishes_order_kind() {
        let ledger = MemoryOrderLedger::new();
        let payment = pending_payment(&ledger);
        let purchase = ledger
            .create_purchase(
                "user-1",
                PurchaseType::AiCredits,
                2,
                2_000_000,
                "UZS",
                ProviderId::Click,
                HashMap::new(),
            )
            .unwrap();

        assert_eq!(ledger.status(&payment.id).unwrap().order_type, "subscription");
        assert_eq!(ledger.status(&purchase.id).unwrap().order_type, "purchase");
        assert!(matches!(
            ledger.status("missing"),
            Err(PaymentError::NotFound(_))
        ));
    }
}
