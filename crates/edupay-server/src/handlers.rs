//! HTTP Handlers
//!
//! Client-facing endpoints speak plain JSON with `{error, code}` bodies
//! on failure. The webhook endpoints never do: each provider reads its
//! own envelope out of a 200 response, so their handlers always answer
//! 200 with the provider's format.

use axum::{
    extract::{Form, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use edupay_core::{
    CheckoutRequest, CheckoutResponse, PaymentError, SettleOutcome,
};
use edupay_providers::{ClickCallback, ClickResponse, PaymeProvider, PaymeRpcRequest};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub payme_configured: bool,
    pub click_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub days: i64,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: code.into(),
        }),
    )
}

fn map_error(e: &PaymentError) -> ApiError {
    match e {
        PaymentError::Validation(m) => api_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", m.clone()),
        PaymentError::NotFound(m) => api_error(StatusCode::NOT_FOUND, "NOT_FOUND", m.clone()),
        PaymentError::Conflict(m) => api_error(StatusCode::CONFLICT, "CONFLICT", m.clone()),
        PaymentError::UnauthorizedWebhook(_) => {
            api_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "unauthorized")
        }
        PaymentError::TransitionRejected { detail, .. } => {
            api_error(StatusCode::CONFLICT, "TRANSITION_REJECTED", detail.clone())
        }
        PaymentError::PricingUnavailable(m) => {
            api_error(StatusCode::BAD_REQUEST, "PRICING_UNAVAILABLE", m.clone())
        }
        PaymentError::Config(m) => api_error(StatusCode::SERVICE_UNAVAILABLE, "NOT_CONFIGURED", m.clone()),
        PaymentError::Storage(_) => {
            tracing::error!(error = %e, "storage failure");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "internal error")
        }
    }
}

/// Caller identity, set by the upstream auth proxy.
fn require_user(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "MISSING_USER", "x-user-id header required"))
}

fn optional_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state.admin_token.as_deref().ok_or_else(|| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "NOT_CONFIGURED",
            "admin endpoints are disabled",
        )
    })?;
    let supplied = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if token_matches(supplied.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "invalid admin token"))
    }
}

fn token_matches(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    use edupay_core::ProviderGateway;

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        payme_configured: state.payme.is_configured(),
        click_configured: state.click.is_configured(),
    })
}

/// Create a pending order and a provider redirect URL
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let user_id = require_user(&headers)?;

    let response = state
        .checkout
        .create_checkout(&user_id, &payload)
        .map_err(|e| map_error(&e))?;

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let info = state
        .checkout
        .order_status(&order_id)
        .map_err(|e| map_error(&e))?;
    Ok(Json(json!(info)))
}

pub async fn list_providers(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.checkout.available_providers()))
}

pub async fn purchase_pricing(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.checkout.purchase_pricing()))
}

pub async fn all_courses_pricing(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_id = optional_user(&headers);
    let pricing = state
        .checkout
        .all_courses_pricing(user_id.as_deref())
        .map_err(|e| map_error(&e))?;
    Ok(Json(json!(pricing)))
}

pub async fn course_pricing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(course_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user_id = optional_user(&headers);
    let pricing = state
        .checkout
        .course_pricing(&course_id, user_id.as_deref())
        .map_err(|e| map_error(&e))?;
    Ok(Json(json!(pricing)))
}

pub async fn payment_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_id = require_user(&headers)?;
    let history = state
        .checkout
        .payment_history(&user_id)
        .map_err(|e| map_error(&e))?;
    Ok(Json(json!(history)))
}

pub async fn roadmap_credits(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_id = require_user(&headers)?;
    let credits = state
        .access
        .roadmap_credits(&user_id)
        .map_err(|e| map_error(&e))?;
    Ok(Json(json!(credits)))
}

pub async fn user_course_accesses(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_id = require_user(&headers)?;
    let accesses = state
        .checkout
        .user_course_accesses(&user_id)
        .map_err(|e| map_error(&e))?;
    Ok(Json(json!(accesses)))
}

/// Admin refund: `completed -> refunded`. Refunding twice is a 409, not
/// a silent duplicate — an operator should know the money already went
/// back.
pub async fn refund_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
    Json(payload): Json<RefundRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;

    match state.settlement.refund(&order_id, &payload.reason) {
        Ok(SettleOutcome::Applied(order)) => Ok(Json(json!({
            "orderId": order.id(),
            "status": order.status(),
        }))),
        Ok(SettleOutcome::Duplicate(_)) => Err(api_error(
            StatusCode::CONFLICT,
            "ALREADY_REFUNDED",
            "order is already refunded",
        )),
        Err(e) => Err(map_error(&e)),
    }
}

pub async fn extend_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subscription_id): Path<String>,
    Json(payload): Json<ExtendRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;

    if payload.days <= 0 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "days must be positive",
        ));
    }
    let subscription = state
        .subscriptions
        .extend(&subscription_id, payload.days)
        .map_err(|e| map_error(&e))?;
    Ok(Json(json!(subscription)))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subscription_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;

    let subscription = state
        .subscriptions
        .cancel(&subscription_id)
        .map_err(|e| map_error(&e))?;
    Ok(Json(json!(subscription)))
}

/// Payme webhook. JSON-RPC over POST; the merchant API reads the error
/// envelope out of a 200 response. Auth is checked before the body is
/// even parsed.
pub async fn payme_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Json<Value> {
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
    if !state.payme.verify_auth(auth) {
        tracing::warn!("payme webhook rejected: bad credentials");
        // Best effort at echoing the request id back
        let id = serde_json::from_str::<PaymeRpcRequest>(&body)
            .ok()
            .and_then(|r| r.id);
        return Json(PaymeProvider::unauthorized_response(id.as_ref()));
    }

    let request: PaymeRpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "payme webhook rejected: unparseable body");
            return Json(json!({
                "error": { "code": -32700, "message": "Parse error" },
                "id": null,
            }));
        }
    };

    Json(state.payme.handle_webhook(&request))
}

/// Click webhook. Form-encoded flat fields; every field is optional at
/// the extractor level so a malformed callback gets Click's own `-8`
/// instead of a framework 422.
pub async fn click_webhook(
    State(state): State<AppState>,
    Form(callback): Form<ClickCallback>,
) -> Json<ClickResponse> {
    Json(state.click.handle_webhook(&callback))
}
