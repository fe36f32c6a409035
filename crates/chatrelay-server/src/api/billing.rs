//! Billing-backed endpoints: balance lookup and identity resolution.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use chatrelay_billing::{BillingError, IdentityRequest};

use crate::api::chat::ApiError;
use crate::api::{ApiResponse, state::AppState};

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub shell_id: Option<String>,
    #[serde(default)]
    pub origin_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalancePayload {
    pub balance: f64,
    pub currency_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topup_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveIdentityBody {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub external_user_id: String,
}

#[derive(Debug, Serialize)]
pub struct IdentityPayload {
    pub user_id: String,
    pub is_new: bool,
}

fn missing_field(name: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::error_with_code(
            "MISSING_FIELD",
            format!("{name} is required"),
        )),
    )
}

/// Billing faults never leak provider detail to the caller.
fn billing_error(error: BillingError) -> ApiError {
    tracing::error!(%error, "Billing request failed");
    (
        StatusCode::BAD_GATEWAY,
        Json(ApiResponse::error_with_code(
            "BILLING_ERROR",
            "The billing service is currently unavailable, please try again later",
        )),
    )
}

// GET /api/balance?user_id=...
pub async fn get_balance(
    State(state): State<AppState>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<ApiResponse<BalancePayload>>, ApiError> {
    if query.user_id.trim().is_empty() {
        return Err(missing_field("user_id"));
    }
    tracing::debug!(
        user_id = %query.user_id,
        shell_id = ?query.shell_id,
        origin_url = ?query.origin_url,
        "Balance lookup"
    );

    let info = state
        .billing
        .balance(&query.user_id)
        .await
        .map_err(billing_error)?;
    Ok(Json(ApiResponse::ok(BalancePayload {
        balance: info.balance,
        currency_name: info.currency_name,
        topup_url: info.topup_url,
    })))
}

// POST /api/identity/resolve
pub async fn resolve_identity(
    State(state): State<AppState>,
    Json(body): Json<ResolveIdentityBody>,
) -> Result<Json<ApiResponse<IdentityPayload>>, ApiError> {
    if body.provider.trim().is_empty() {
        return Err(missing_field("provider"));
    }
    if body.tenant.trim().is_empty() {
        return Err(missing_field("tenant"));
    }
    if body.external_user_id.trim().is_empty() {
        return Err(missing_field("external_user_id"));
    }

    let info = state
        .billing
        .resolve_identity(IdentityRequest {
            provider: body.provider,
            tenant: body.tenant,
            external_user_id: body.external_user_id,
        })
        .await
        .map_err(billing_error)?;
    Ok(Json(ApiResponse::ok(IdentityPayload {
        user_id: info.user_id,
        is_new: info.is_new,
    })))
}
