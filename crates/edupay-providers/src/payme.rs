//! Payme Gateway
//!
//! JSON-RPC 2.0 merchant API. Payme authenticates itself with a
//! shared-secret Basic header and expects a JSON-RPC envelope in every
//! response — including auth failures — with the request `id` echoed
//! back. Amounts are in tiyn throughout.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use edupay_core::{
    Order, OrderStatus, PaymentError, ProviderGateway, ProviderId, Result, SettlementService,
};

use crate::sign::constant_time_eq;

// Payme merchant API error codes
const ERR_INVALID_AMOUNT: i64 = -31001;
const ERR_TX_NOT_FOUND: i64 = -31003;
const ERR_CANNOT_PERFORM: i64 = -31008;
const ERR_ORDER_NOT_FOUND: i64 = -31050;
const ERR_SYSTEM: i64 = -32400;
const ERR_UNAUTHORIZED: i64 = -32504;
const ERR_METHOD_NOT_FOUND: i64 = -32601;

// Payme transaction states
const STATE_CREATED: i64 = 1;
const STATE_COMPLETED: i64 = 2;
const STATE_CANCELLED: i64 = -1;
const STATE_CANCELLED_AFTER_COMPLETE: i64 = -2;

#[derive(Clone, Debug)]
pub struct PaymeConfig {
    pub merchant_id: String,
    /// Webhook password shared with Payme ("Paycom" user)
    pub key: String,
    pub checkout_url: String,
}

impl PaymeConfig {
    /// `PAYME_MERCHANT_ID` and `PAYME_KEY`; absent credentials mean
    /// the provider is simply not configured.
    pub fn from_env() -> Option<Self> {
        let merchant_id = std::env::var("PAYME_MERCHANT_ID").ok()?;
        let key = std::env::var("PAYME_KEY").ok()?;
        let checkout_url = std::env::var("PAYME_CHECKOUT_URL")
            .unwrap_or_else(|_| "https://checkout.paycom.uz".into());
        Some(Self {
            merchant_id,
            key,
            checkout_url,
        })
    }
}

/// Inbound JSON-RPC envelope
#[derive(Clone, Debug, Deserialize)]
pub struct PaymeRpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

struct RpcError {
    code: i64,
    message: &'static str,
}

impl RpcError {
    const fn new(code: i64, message: &'static str) -> Self {
        Self { code, message }
    }
}

pub struct PaymeProvider {
    config: Option<PaymeConfig>,
    settlement: Arc<SettlementService>,
}

impl PaymeProvider {
    pub fn new(config: Option<PaymeConfig>, settlement: Arc<SettlementService>) -> Self {
        Self { config, settlement }
    }

    pub fn from_env(settlement: Arc<SettlementService>) -> Self {
        Self::new(PaymeConfig::from_env(), settlement)
    }

    /// Shared-secret header check, constant time. Payme sends
    /// `Authorization: Basic base64("Paycom:<key>")`.
    pub fn verify_auth(&self, header: Option<&str>) -> bool {
        let Some(config) = &self.config else {
            return false;
        };
        let Some(encoded) = header.and_then(|h| h.strip_prefix("Basic ")) else {
            return false;
        };

        let expected = BASE64.encode(format!("Paycom:{}", config.key));
        constant_time_eq(encoded.as_bytes(), expected.as_bytes())
    }

    /// The provider-mandated auth-failure envelope. Payme parses the
    /// body regardless of HTTP status, so this goes out as 200.
    pub fn unauthorized_response(id: Option<&Value>) -> Value {
        json!({
            "error": { "code": ERR_UNAUTHORIZED, "message": "Unauthorized" },
            "id": id,
        })
    }

    /// Decode one JSON-RPC call and answer with Payme's envelope.
    /// Never errors outward: every failure becomes a coded envelope.
    pub fn handle_webhook(&self, req: &PaymeRpcRequest) -> Value {
        tracing::info!(method = %req.method, "payme webhook");

        match self.dispatch(&req.method, &req.params) {
            Ok(result) => json!({ "result": result, "id": req.id }),
            Err(e) => {
                tracing::warn!(method = %req.method, code = e.code, "payme webhook error");
                json!({
                    "error": { "code": e.code, "message": e.message },
                    "id": req.id,
                })
            }
        }
    }

    fn dispatch(&self, method: &str, params: &Value) -> std::result::Result<Value, RpcError> {
        match method {
            "CheckPerformTransaction" => self.check_perform(params),
            "CreateTransaction" => self.create_transaction(params),
            "PerformTransaction" => self.perform_transaction(params),
            "CancelTransaction" => self.cancel_transaction(params),
            "CheckTransaction" => self.check_transaction(params),
            _ => Err(RpcError::new(ERR_METHOD_NOT_FOUND, "Method not found")),
        }
    }

    /// Pre-flight: can this order accept this amount right now?
    fn check_perform(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let order = self.order_from_account(params)?;
        self.check_amount(&order, params)?;
        if order.status() != OrderStatus::Pending {
            return Err(RpcError::new(ERR_CANNOT_PERFORM, "Order is not payable"));
        }
        Ok(json!({ "allow": true }))
    }

    /// Bind Payme's transaction id to the order. One transaction per
    /// order: a second id for the same order is refused.
    fn create_transaction(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let tx_id = tx_id_param(params)?;
        let order = self.order_from_account(params)?;
        self.check_amount(&order, params)?;

        match order.provider_tx_id() {
            Some(existing) if existing != tx_id => {
                return Err(RpcError::new(
                    ERR_CANNOT_PERFORM,
                    "Order is bound to another transaction",
                ));
            }
            _ => {}
        }
        if order.status() != OrderStatus::Pending {
            return Err(RpcError::new(ERR_CANNOT_PERFORM, "Order is not payable"));
        }

        self.settlement
            .attach_provider_tx(order.id(), tx_id)
            .map_err(internal)?;

        let create_time = params
            .get("time")
            .and_then(Value::as_i64)
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        Ok(json!({
            "create_time": create_time,
            "transaction": order.id(),
            "state": STATE_CREATED,
        }))
    }

    /// Settle: `pending -> completed`. Retried deliveries are answered
    /// identically without re-granting anything.
    fn perform_transaction(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let tx_id = tx_id_param(params)?;
        let order = self.order_by_tx(tx_id)?;

        let outcome = self
            .settlement
            .complete(order.id(), Some(tx_id))
            .map_err(|e| match e {
                PaymentError::TransitionRejected { .. } => {
                    RpcError::new(ERR_CANNOT_PERFORM, "Unable to perform operation")
                }
                _ => internal(e),
            })?;

        Ok(json!({
            "transaction": outcome.order().id(),
            "perform_time": Utc::now().timestamp_millis(),
            "state": STATE_COMPLETED,
        }))
    }

    /// Cancel before settlement fails the order; cancel after
    /// settlement refunds it. Both are idempotent under retries.
    fn cancel_transaction(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let tx_id = tx_id_param(params)?;
        let order = self.order_by_tx(tx_id)?;
        let reason = params.get("reason").and_then(Value::as_i64).unwrap_or(0);

        let state = match order.status() {
            OrderStatus::Pending | OrderStatus::Failed => {
                self.settlement
                    .fail(order.id(), Some(tx_id))
                    .map_err(cannot_perform)?;
                STATE_CANCELLED
            }
            OrderStatus::Completed | OrderStatus::Refunded => {
                self.settlement
                    .refund(order.id(), &format!("payme cancel, reason {reason}"))
                    .map_err(cannot_perform)?;
                STATE_CANCELLED_AFTER_COMPLETE
            }
        };

        Ok(json!({
            "transaction": order.id(),
            "cancel_time": Utc::now().timestamp_millis(),
            "state": state,
        }))
    }

    fn check_transaction(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let tx_id = tx_id_param(params)?;
        let order = self.order_by_tx(tx_id)?;

        let state = match order.status() {
            OrderStatus::Pending => STATE_CREATED,
            OrderStatus::Completed => STATE_COMPLETED,
            OrderStatus::Failed => STATE_CANCELLED,
            OrderStatus::Refunded => STATE_CANCELLED_AFTER_COMPLETE,
        };
        Ok(json!({ "transaction": order.id(), "state": state }))
    }

    fn order_from_account(&self, params: &Value) -> std::result::Result<Order, RpcError> {
        let order_id = params
            .get("account")
            .and_then(|a| a.get("order_id"))
            .and_then(Value::as_str)
            .ok_or(RpcError::new(ERR_ORDER_NOT_FOUND, "Order not found"))?;

        self.settlement
            .order(order_id)
            .map_err(internal)?
            .ok_or(RpcError::new(ERR_ORDER_NOT_FOUND, "Order not found"))
    }

    fn order_by_tx(&self, tx_id: &str) -> std::result::Result<Order, RpcError> {
        self.settlement
            .order_by_provider_tx(ProviderId::Payme, tx_id)
            .map_err(internal)?
            .ok_or(RpcError::new(ERR_TX_NOT_FOUND, "Transaction not found"))
    }

    fn check_amount(&self, order: &Order, params: &Value) -> std::result::Result<(), RpcError> {
        let claimed = params
            .get("amount")
            .and_then(Value::as_i64)
            .ok_or(RpcError::new(ERR_INVALID_AMOUNT, "Incorrect amount"))?;
        self.settlement
            .verify_amount(order, claimed)
            .map_err(|_| RpcError::new(ERR_INVALID_AMOUNT, "Incorrect amount"))
    }
}

fn tx_id_param(params: &Value) -> std::result::Result<&str, RpcError> {
    params
        .get("id")
        .and_then(Value::as_str)
        .ok_or(RpcError::new(ERR_TX_NOT_FOUND, "Transaction not found"))
}

fn internal(e: PaymentError) -> RpcError {
    tracing::error!(error = %e, "payme internal error");
    RpcError::new(ERR_SYSTEM, "Internal error")
}

fn cannot_perform(e: PaymentError) -> RpcError {
    match e {
        PaymentError::TransitionRejected { .. } => {
            RpcError::new(ERR_CANNOT_PERFORM, "Unable to perform operation")
        }
        _ => internal(e),
    }
}

impl ProviderGateway for PaymeProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Payme
    }

    fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    fn generate_payment_link(
        &self,
        order_id: &str,
        amount: i64,
        return_url: Option<&str>,
    ) -> Result<String> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| PaymentError::Config("Payme is not configured".into()))?;

        let mut params = format!("m={};ac.order_id={order_id};a={amount}", config.merchant_id);
        if let Some(url) = return_url {
            params.push_str(&format!(";c={url}"));
        }

        Ok(format!(
            "{}/{}",
            config.checkout_url.trim_end_matches('/'),
            BASE64.encode(params)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edupay_core::{
        AuditEmitter, EntitlementStore, MemoryEntitlementStore, MemoryOrderLedger,
        MemorySubscriptionStore, OrderLedger, PurchaseType,
    };
    use std::collections::HashMap;

    struct Fixture {
        ledger: Arc<MemoryOrderLedger>,
        entitlements: Arc<MemoryEntitlementStore>,
        provider: PaymeProvider,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MemoryOrderLedger::new());
        let subscriptions = Arc::new(MemorySubscriptionStore::new());
        let entitlements = Arc::new(MemoryEntitlementStore::new());
        let settlement = Arc::new(SettlementService::new(
            ledger.clone(),
            subscriptions,
            entitlements.clone(),
            AuditEmitter::disabled(),
        ));
        let provider = PaymeProvider::new(
            Some(PaymeConfig {
                merchant_id: "merchant-1".into(),
                key: "webhook-key".into(),
                checkout_url: "https://checkout.paycom.uz".into(),
            }),
            settlement,
        );
        Fixture {
            ledger,
            entitlements,
            provider,
        }
    }

    fn pending_credits_purchase(f: &Fixture) -> String {
        f.ledger
            .create_purchase(
                "u1",
                PurchaseType::AiCredits,
                1,
                1_000_000,
                "UZS",
                ProviderId::Payme,
                HashMap::new(),
            )
            .unwrap()
            .id
    }

    fn rpc(method: &str, params: Value) -> PaymeRpcRequest {
        PaymeRpcRequest {
            method: method.into(),
            params,
            id: Some(json!(7)),
        }
    }

    fn error_code(response: &Value) -> Option<i64> {
        response.get("error")?.get("code")?.as_i64()
    }

    #[test]
    fn test_auth_header_verification() {
        let f = fixture();
        let good = format!("Basic {}", BASE64.encode("Paycom:webhook-key"));

        assert!(f.provider.verify_auth(Some(&good)));
        assert!(!f.provider.verify_auth(Some("Basic d3Jvbmc=")));
        assert!(!f.provider.verify_auth(Some("Bearer token")));
        assert!(!f.provider.verify_auth(None));
    }

    #[test]
    fn test_unauthorized_envelope_echoes_id() {
        let id = json!(42);
        let response = PaymeProvider::unauthorized_response(Some(&id));
        assert_eq!(error_code(&response), Some(ERR_UNAUTHORIZED));
        assert_eq!(response["id"], json!(42));
    }

    #[test]
    fn test_check_perform_validates_amount() {
        let f = fixture();
        let order_id = pending_credits_purchase(&f);

        let ok = f.provider.handle_webhook(&rpc(
            "CheckPerformTransaction",
            json!({ "amount": 1_000_000, "account": { "order_id": order_id } }),
        ));
        assert_eq!(ok["result"]["allow"], json!(true));
        assert_eq!(ok["id"], json!(7));

        let wrong = f.provider.handle_webhook(&rpc(
            "CheckPerformTransaction",
            json!({ "amount": 5, "account": { "order_id": order_id } }),
        ));
        assert_eq!(error_code(&wrong), Some(ERR_INVALID_AMOUNT));

        let missing = f.provider.handle_webhook(&rpc(
            "CheckPerformTransaction",
            json!({ "amount": 1_000_000, "account": { "order_id": "nope" } }),
        ));
        assert_eq!(error_code(&missing), Some(ERR_ORDER_NOT_FOUND));
    }

    #[test]
    fn test_full_settlement_flow_is_idempotent() {
        let f = fixture();
        let order_id = pending_credits_purchase(&f);

        let created = f.provider.handle_webhook(&rpc(
            "CreateTransaction",
            json!({
                "id": "ptx-1",
                "time": 1_700_000_000_000_i64,
                "amount": 1_000_000,
                "account": { "order_id": order_id },
            }),
        ));
        assert_eq!(created["result"]["state"], json!(STATE_CREATED));

        let performed = f
            .provider
            .handle_webhook(&rpc("PerformTransaction", json!({ "id": "ptx-1" })));
        assert_eq!(performed["result"]["state"], json!(STATE_COMPLETED));
        assert_eq!(f.entitlements.ai_credits("u1").unwrap(), 50);

        // Payme retries PerformTransaction until acknowledged
        let retried = f
            .provider
            .handle_webhook(&rpc("PerformTransaction", json!({ "id": "ptx-1" })));
        assert_eq!(retried["result"]["state"], json!(STATE_COMPLETED));
        assert_eq!(f.entitlements.ai_credits("u1").unwrap(), 50);
    }

    #[test]
    fn test_second_transaction_for_same_order_refused() {
        let f = fixture();
        let order_id = pending_credits_purchase(&f);

        f.provider.handle_webhook(&rpc(
            "CreateTransaction",
            json!({ "id": "ptx-1", "amount": 1_000_000, "account": { "order_id": order_id } }),
        ));
        let second = f.provider.handle_webhook(&rpc(
            "CreateTransaction",
            json!({ "id": "ptx-2", "amount": 1_000_000, "account": { "order_id": order_id } }),
        ));
        assert_eq!(error_code(&second), Some(ERR_CANNOT_PERFORM));
    }

    #[test]
    fn test_cancel_after_completion_refunds() {
        let f = fixture();
        let order_id = pending_credits_purchase(&f);

        f.provider.handle_webhook(&rpc(
            "CreateTransaction",
            json!({ "id": "ptx-1", "amount": 1_000_000, "account": { "order_id": order_id } }),
        ));
        f.provider
            .handle_webhook(&rpc("PerformTransaction", json!({ "id": "ptx-1" })));

        let cancelled = f.provider.handle_webhook(&rpc(
            "CancelTransaction",
            json!({ "id": "ptx-1", "reason": 5 }),
        ));
        assert_eq!(
            cancelled["result"]["state"],
            json!(STATE_CANCELLED_AFTER_COMPLETE)
        );
        assert_eq!(
            f.ledger.status(&order_id).unwrap().status,
            OrderStatus::Refunded
        );

        let checked = f
            .provider
            .handle_webhook(&rpc("CheckTransaction", json!({ "id": "ptx-1" })));
        assert_eq!(
            checked["result"]["state"],
            json!(STATE_CANCELLED_AFTER_COMPLETE)
        );
    }

    #[test]
    fn test_cancel_before_completion_fails_order() {
        let f = fixture();
        let order_id = pending_credits_purchase(&f);

        f.provider.handle_webhook(&rpc(
            "CreateTransaction",
            json!({ "id": "ptx-1", "amount": 1_000_000, "account": { "order_id": order_id } }),
        ));
        let cancelled = f
            .provider
            .handle_webhook(&rpc("CancelTransaction", json!({ "id": "ptx-1" })));
        assert_eq!(cancelled["result"]["state"], json!(STATE_CANCELLED));
        assert_eq!(
            f.ledger.status(&order_id).unwrap().status,
            OrderStatus::Failed
        );
        assert_eq!(f.entitlements.ai_credits("u1").unwrap(), 0);
    }

    #[test]
    fn test_unknown_method() {
        let f = fixture();
        let response = f
            .provider
            .handle_webhook(&rpc("GetStatement", json!({})));
        assert_eq!(error_code(&response), Some(ERR_METHOD_NOT_FOUND));
    }

    #[test]
    fn test_payment_link_embeds_order() {
        let f = fixture();
        let link = f
            .provider
            .generate_payment_link("order-1", 450_000, Some("https://app.test/paid"))
            .unwrap();

        let encoded = link.rsplit('/').next().unwrap();
        let decoded = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
        assert_eq!(
            decoded,
            "m=merchant-1;ac.order_id=order-1;a=450000;c=https://app.test/paid"
        );
    }
}
