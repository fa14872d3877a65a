//! Application State

use std::sync::Arc;

use edupay_core::{AccessService, CheckoutService, SettlementService, SubscriptionStore};
use edupay_providers::{ClickProvider, PaymeProvider};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Checkout orchestration and catalog queries
    pub checkout: Arc<CheckoutService>,

    /// Ledger transitions for refunds and webhook settlement
    pub settlement: Arc<SettlementService>,

    /// Entitlement queries (course access, roadmap credits)
    pub access: Arc<AccessService>,

    /// Subscription store for the admin endpoints
    pub subscriptions: Arc<dyn SubscriptionStore>,

    /// Payme gateway (unconfigured if credentials are absent)
    pub payme: Arc<PaymeProvider>,

    /// Click gateway (unconfigured if credentials are absent)
    pub click: Arc<ClickProvider>,

    /// Admin token (None disables the admin endpoints)
    pub admin_token: Option<String>,
}
