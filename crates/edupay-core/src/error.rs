//! Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Settlement-core errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Malformed or missing request fields
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown plan, course, or order
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate purchase of an already-owned resource
    #[error("conflict: {0}")]
    Conflict(String),

    /// Webhook signature or credential check failed
    #[error("unauthorized webhook: {0}")]
    UnauthorizedWebhook(String),

    /// Attempted illegal order state change
    #[error("transition rejected for order {order_id}: {detail}")]
    TransitionRejected { order_id: String, detail: String },

    /// No active plan backing a dynamic price
    #[error("pricing unavailable: {0}")]
    PricingUnavailable(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Shorthand for a rejected transition.
    pub fn rejected(order_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::TransitionRejected {
            order_id: order_id.into(),
            detail: detail.into(),
        }
    }
}
