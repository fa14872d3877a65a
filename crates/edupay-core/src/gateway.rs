//! Provider Gateway Seam
//!
//! The uniform capability surface every payment provider exposes to
//! the checkout path. Webhook decoding and verification stay on the
//! concrete provider types in `edupay-providers` — the dispatcher
//! selects a provider by route, never by inspecting payloads.

use crate::error::Result;
use crate::order::ProviderId;

pub trait ProviderGateway: Send + Sync {
    fn id(&self) -> ProviderId;

    /// False until the provider's merchant credentials are present.
    /// An unconfigured provider is never selectable at checkout.
    fn is_configured(&self) -> bool;

    /// Deterministic redirect URL embedding the order id, so the
    /// provider's webhook can look the order back up. `amount` is in
    /// the smallest currency unit; providers converting to whole units
    /// do so internally.
    fn generate_payment_link(
        &self,
        order_id: &str,
        amount: i64,
        return_url: Option<&str>,
    ) -> Result<String>;
}
