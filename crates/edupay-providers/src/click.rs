//! Click Gateway
//!
//! Flat-field signed callbacks with a two-phase protocol: action 0
//! (Prepare) validates the order, action 1 (Complete) settles it.
//! Click reads numeric result codes out of the response body and
//! ignores the HTTP status, so every outcome is answered as 200 with
//! the field-based envelope. Click amounts are in whole UZS; the
//! ledger stores tiyn.
//!
//! Prepare carries no durable obligation here: `merchant_prepare_id`
//! is derived deterministically from the order id and re-checked on
//! Complete, so a Complete for a never-prepared or foreign order is
//! refused without the gateway holding any state of its own.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use edupay_core::{
    Order, OrderStatus, PaymentError, ProviderGateway, ProviderId, Result, SettleOutcome,
    SettlementService,
};

use crate::sign::{hmac_hex, verify_hmac_hex};

/// Click SHOP-API result codes
pub mod code {
    pub const SUCCESS: i32 = 0;
    pub const SIGN_CHECK_FAILED: i32 = -1;
    pub const INCORRECT_AMOUNT: i32 = -2;
    pub const ACTION_NOT_FOUND: i32 = -3;
    pub const ALREADY_PAID: i32 = -4;
    pub const ORDER_NOT_FOUND: i32 = -5;
    pub const TRANSACTION_NOT_FOUND: i32 = -6;
    pub const FAILED_TO_UPDATE: i32 = -7;
    pub const BAD_REQUEST: i32 = -8;
    pub const TRANSACTION_CANCELLED: i32 = -9;
}

const ACTION_PREPARE: i64 = 0;
const ACTION_COMPLETE: i64 = 1;

#[derive(Clone, Debug)]
pub struct ClickConfig {
    pub service_id: String,
    pub merchant_id: String,
    pub secret_key: String,
    pub pay_url: String,
}

impl ClickConfig {
    /// `CLICK_SERVICE_ID`, `CLICK_MERCHANT_ID`, `CLICK_SECRET_KEY`;
    /// absent credentials mean the provider is not configured.
    pub fn from_env() -> Option<Self> {
        let service_id = std::env::var("CLICK_SERVICE_ID").ok()?;
        let merchant_id = std::env::var("CLICK_MERCHANT_ID").ok()?;
        let secret_key = std::env::var("CLICK_SECRET_KEY").ok()?;
        let pay_url =
            std::env::var("CLICK_PAY_URL").unwrap_or_else(|_| "https://my.click.uz".into());
        Some(Self {
            service_id,
            merchant_id,
            secret_key,
            pay_url,
        })
    }
}

/// Inbound callback, kept as raw strings: the signature is computed
/// over the fields exactly as Click sent them, and validation errors
/// must be answered with Click's own codes rather than a framework
/// rejection.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClickCallback {
    pub click_trans_id: Option<String>,
    pub service_id: Option<String>,
    pub merchant_trans_id: Option<String>,
    pub merchant_prepare_id: Option<String>,
    pub amount: Option<String>,
    pub action: Option<String>,
    pub sign_time: Option<String>,
    pub sign_string: Option<String>,
    pub error: Option<String>,
    pub error_note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClickResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_trans_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_trans_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_prepare_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_confirm_id: Option<i64>,
    pub error: i32,
    pub error_note: String,
}

impl ClickResponse {
    fn success(click_trans_id: i64, merchant_trans_id: &str) -> Self {
        Self {
            click_trans_id: Some(click_trans_id),
            merchant_trans_id: Some(merchant_trans_id.to_string()),
            merchant_prepare_id: None,
            merchant_confirm_id: None,
            error: code::SUCCESS,
            error_note: "Success".into(),
        }
    }

    pub fn failure(error: i32, note: &str) -> Self {
        Self {
            click_trans_id: None,
            merchant_trans_id: None,
            merchant_prepare_id: None,
            merchant_confirm_id: None,
            error,
            error_note: note.into(),
        }
    }
}

/// Signature payload: the callback fields in wire order, concatenated
/// as sent, MACed under the merchant secret.
pub fn sign_payload(
    secret: &str,
    click_trans_id: &str,
    service_id: &str,
    merchant_trans_id: &str,
    merchant_prepare_id: Option<&str>,
    amount: &str,
    action: &str,
    sign_time: &str,
) -> String {
    let mut payload = String::new();
    payload.push_str(click_trans_id);
    payload.push_str(service_id);
    payload.push_str(merchant_trans_id);
    if let Some(prepare_id) = merchant_prepare_id {
        payload.push_str(prepare_id);
    }
    payload.push_str(amount);
    payload.push_str(action);
    payload.push_str(sign_time);
    hmac_hex(secret, &payload)
}

/// Stable `merchant_prepare_id` for an order, derived rather than
/// persisted.
fn prepare_id_for(order_id: &str) -> i64 {
    let digest = Sha256::digest(order_id.as_bytes());
    i64::from(u32::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3],
    ]))
}

struct ParsedCallback<'a> {
    click_trans_id_raw: &'a str,
    click_trans_id: i64,
    service_id: &'a str,
    merchant_trans_id: &'a str,
    merchant_prepare_id: Option<&'a str>,
    amount_raw: &'a str,
    action_raw: &'a str,
    action: i64,
    sign_time: &'a str,
    sign_string: &'a str,
    error: Option<i64>,
}

impl<'a> ParsedCallback<'a> {
    fn from_callback(cb: &'a ClickCallback) -> Option<Self> {
        let click_trans_id_raw = cb.click_trans_id.as_deref()?;
        let amount_raw = cb.amount.as_deref()?;
        let action_raw = cb.action.as_deref()?;
        Some(Self {
            click_trans_id_raw,
            click_trans_id: click_trans_id_raw.parse().ok()?,
            service_id: cb.service_id.as_deref()?,
            merchant_trans_id: cb.merchant_trans_id.as_deref()?,
            merchant_prepare_id: cb.merchant_prepare_id.as_deref(),
            amount_raw,
            action_raw,
            action: action_raw.parse().ok()?,
            sign_time: cb.sign_time.as_deref()?,
            sign_string: cb.sign_string.as_deref()?,
            error: cb.error.as_deref().and_then(|e| e.parse().ok()),
        })
    }
}

pub struct ClickProvider {
    config: Option<ClickConfig>,
    settlement: Arc<SettlementService>,
}

impl ClickProvider {
    pub fn new(config: Option<ClickConfig>, settlement: Arc<SettlementService>) -> Self {
        Self { config, settlement }
    }

    pub fn from_env(settlement: Arc<SettlementService>) -> Self {
        Self::new(ClickConfig::from_env(), settlement)
    }

    /// Sign a callback the way Click would. Used by the link tests and
    /// available for request signing toward Click's own API.
    pub fn sign_callback(&self, cb: &ClickCallback) -> Option<String> {
        let config = self.config.as_ref()?;
        Some(sign_payload(
            &config.secret_key,
            cb.click_trans_id.as_deref()?,
            cb.service_id.as_deref()?,
            cb.merchant_trans_id.as_deref()?,
            cb.merchant_prepare_id.as_deref(),
            cb.amount.as_deref()?,
            cb.action.as_deref()?,
            cb.sign_time.as_deref()?,
        ))
    }

    /// Decode and answer one callback. Never errors outward: every
    /// failure becomes a coded envelope Click understands.
    pub fn handle_webhook(&self, cb: &ClickCallback) -> ClickResponse {
        let Some(config) = &self.config else {
            return ClickResponse::failure(code::SIGN_CHECK_FAILED, "Service not configured");
        };

        let Some(parsed) = ParsedCallback::from_callback(cb) else {
            return ClickResponse::failure(code::BAD_REQUEST, "Missing required fields");
        };
        tracing::info!(
            click_trans_id = parsed.click_trans_id,
            merchant_trans_id = parsed.merchant_trans_id,
            action = parsed.action,
            "click webhook"
        );

        if parsed.service_id != config.service_id {
            return ClickResponse::failure(code::BAD_REQUEST, "Unknown service");
        }
        if parsed.action == ACTION_COMPLETE && parsed.merchant_prepare_id.is_none() {
            return ClickResponse::failure(code::BAD_REQUEST, "Missing merchant_prepare_id");
        }

        if !verify_hmac_hex(&config.secret_key, &signed_fields(&parsed), parsed.sign_string) {
            tracing::warn!(
                merchant_trans_id = parsed.merchant_trans_id,
                "click signature check failed"
            );
            return ClickResponse::failure(code::SIGN_CHECK_FAILED, "Sign check failed");
        }

        let order = match self.settlement.order(parsed.merchant_trans_id) {
            Ok(Some(order)) => order,
            Ok(None) => return ClickResponse::failure(code::ORDER_NOT_FOUND, "Order not found"),
            Err(e) => {
                tracing::error!(error = %e, "click order lookup failed");
                return ClickResponse::failure(code::FAILED_TO_UPDATE, "Internal error");
            }
        };

        let Some(claimed_tiyn) = parse_amount_tiyn(parsed.amount_raw) else {
            return ClickResponse::failure(code::BAD_REQUEST, "Malformed amount");
        };
        if self.settlement.verify_amount(&order, claimed_tiyn).is_err() {
            return ClickResponse::failure(code::INCORRECT_AMOUNT, "Incorrect parameter amount");
        }

        match parsed.action {
            ACTION_PREPARE => self.prepare(&parsed, &order),
            ACTION_COMPLETE => self.complete(&parsed, &order),
            _ => ClickResponse::failure(code::ACTION_NOT_FOUND, "Action not found"),
        }
    }

    fn prepare(&self, parsed: &ParsedCallback<'_>, order: &Order) -> ClickResponse {
        match order.status() {
            OrderStatus::Pending => {
                let mut response =
                    ClickResponse::success(parsed.click_trans_id, parsed.merchant_trans_id);
                response.merchant_prepare_id = Some(prepare_id_for(order.id()));
                response
            }
            OrderStatus::Completed => ClickResponse::failure(code::ALREADY_PAID, "Already paid"),
            OrderStatus::Failed | OrderStatus::Refunded => {
                ClickResponse::failure(code::TRANSACTION_CANCELLED, "Transaction cancelled")
            }
        }
    }

    fn complete(&self, parsed: &ParsedCallback<'_>, order: &Order) -> ClickResponse {
        let expected_prepare_id = prepare_id_for(order.id());
        let claimed_prepare_id = parsed
            .merchant_prepare_id
            .and_then(|p| p.parse::<i64>().ok());
        if claimed_prepare_id != Some(expected_prepare_id) {
            return ClickResponse::failure(code::TRANSACTION_NOT_FOUND, "Transaction not found");
        }

        // Click reports its own upstream failure through the error field
        if parsed.error.is_some_and(|e| e < 0) {
            let _ = self
                .settlement
                .fail(order.id(), Some(parsed.click_trans_id_raw));
            return ClickResponse::failure(code::TRANSACTION_CANCELLED, "Transaction cancelled");
        }

        match self
            .settlement
            .complete(order.id(), Some(parsed.click_trans_id_raw))
        {
            Ok(SettleOutcome::Applied(order)) => {
                let mut response =
                    ClickResponse::success(parsed.click_trans_id, parsed.merchant_trans_id);
                response.merchant_confirm_id = Some(prepare_id_for(order.id()));
                response
            }
            Ok(SettleOutcome::Duplicate(_)) => {
                ClickResponse::failure(code::ALREADY_PAID, "Already paid")
            }
            Err(PaymentError::TransitionRejected { .. }) => {
                ClickResponse::failure(code::TRANSACTION_CANCELLED, "Transaction cancelled")
            }
            Err(e) => {
                tracing::error!(error = %e, "click settlement failed");
                ClickResponse::failure(code::FAILED_TO_UPDATE, "Internal error")
            }
        }
    }
}

fn signed_fields(parsed: &ParsedCallback<'_>) -> String {
    let mut payload = String::new();
    payload.push_str(parsed.click_trans_id_raw);
    payload.push_str(parsed.service_id);
    payload.push_str(parsed.merchant_trans_id);
    if let Some(prepare_id) = parsed.merchant_prepare_id {
        payload.push_str(prepare_id);
    }
    payload.push_str(parsed.amount_raw);
    payload.push_str(parsed.action_raw);
    payload.push_str(parsed.sign_time);
    payload
}

/// Click sends whole UZS, possibly with decimals; the ledger stores
/// tiyn.
fn parse_amount_tiyn(raw: &str) -> Option<i64> {
    let uzs: f64 = raw.parse().ok()?;
    if !uzs.is_finite() || uzs < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some((uzs * 100.0).round() as i64)
}

impl ProviderGateway for ClickProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Click
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
            .ok_or_else(|| PaymentError::Config("Click is not configured".into()))?;

        // Click takes whole UZS in the pay link
        let uzs = if amount % 100 == 0 {
            (amount / 100).to_string()
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                format!("{:.2}", amount as f64 / 100.0)
            }
        };

        let mut link = format!(
            "{}/services/pay?service_id={}&merchant_id={}&amount={uzs}&transaction_param={order_id}",
            config.pay_url.trim_end_matches('/'),
            config.service_id,
            config.merchant_id,
        );
        if let Some(url) = return_url {
            link.push_str(&format!("&return_url={url}"));
        }
        Ok(link)
    }
}
