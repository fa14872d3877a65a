//! Audit Emission
//!
//! Settlement events are pushed to an external audit sink. Emission is
//! fire-and-forget over an unbounded channel: a full or closed sink
//! must never block or fail the settlement path.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub action: String,
    pub order_id: Option<String>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AuditEmitter {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditEmitter {
    /// Channel pair; the receiver side belongs to the sink task.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emitter whose events go nowhere (tests, tooling).
    pub fn disabled() -> Self {
        let (emitter, _rx) = Self::channel();
        emitter
    }

    pub fn emit(&self, action: &str, order_id: Option<&str>, detail: impl Into<String>) {
        let event = AuditEvent {
            action: action.to_string(),
            order_id: order_id.map(str::to_string),
            detail: detail.into(),
            at: Utc::now(),
        };

        if self.tx.send(event).is_err() {
            tracing::debug!(action, "audit sink closed, event dropped");
        }
    }
}

/// Drains audit events into the log under the `audit` target. Stands in
/// for the external audit-log collaborator, which owns persistence.
pub fn spawn_audit_logger(
    mut rx: mpsc::UnboundedReceiver<AuditEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::info!(
                target: "audit",
                action = %event.action,
                order_id = ?event.order_id,
                detail = %event.detail,
                at = %event.at,
                "audit event"
            );
        }
    })
}
