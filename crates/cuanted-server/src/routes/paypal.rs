//! PayPal subscription activation, cancellation and webhook.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use cuanted_api::{ApiError, ApiResult};
use cuanted_auth::AuthUser;
use cuanted_billing::paypal::{
    PaypalAction, PaypalClient, PaypalEvent, TransmissionHeaders, activation_change, reconcile,
};
use cuanted_billing::{ProfileTarget, Reconciliation};
use cuanted_db_postgres::{ProfileChange, ProfileKey, ProfileStorage};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{JsonBody, apply_reconciliation};
use crate::server::AppState;

const DEFAULT_CANCEL_REASON: &str = "User requested cancellation from dashboard";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/paypal/activate", post(activate))
        .route("/api/paypal/cancel", post(cancel))
        .route("/api/paypal/webhook", post(webhook))
}

fn client(state: &AppState) -> ApiResult<Arc<PaypalClient>> {
    state.paypal.clone().ok_or_else(|| {
        tracing::error!("PayPal request received but paypal credentials are not configured");
        ApiError::internal("Payments are not available")
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivateBody {
    subscription_id: Option<String>,
    plan_type: Option<String>,
}

/// Stores a subscription the buyer just approved in the browser.
async fn activate(
    user: AuthUser,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ActivateBody>,
) -> ApiResult<Json<Value>> {
    let subscription_id = body
        .subscription_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing subscription id"))?;

    let paypal = client(&state)?;
    let subscription = paypal
        .get_subscription(subscription_id)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, subscription_id, "PayPal subscription lookup failed");
            ApiError::bad_request("Invalid subscription")
        })?;

    let change = activation_change(&subscription, subscription_id, body.plan_type.as_deref());
    apply_reconciliation(
        &state,
        &Reconciliation::new(ProfileTarget::Id(user.uid.clone()), change),
    )
    .await?;
    tracing::info!(uid = %user.uid, subscription_id, status = %subscription.status, "PayPal subscription activated");

    Ok(Json(json!({ "success": true, "status": subscription.status })))
}

#[derive(Debug, Default, Deserialize)]
struct CancelBody {
    reason: Option<String>,
}

/// Cancels at PayPal; access continues until the paid period ends.
async fn cancel(
    user: AuthUser,
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let profiles = ProfileStorage::new(&state.pool);
    let subscription_id = profiles
        .paypal_subscription_id(&user.uid)
        .await?
        .ok_or_else(|| ApiError::bad_request("No active subscription found"))?;

    // The body is optional; an empty or malformed one uses the default reason.
    let reason = serde_json::from_slice::<CancelBody>(&body)
        .ok()
        .and_then(|b| b.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());

    client(&state)?
        .cancel_subscription(&subscription_id, &reason)
        .await?;
    profiles
        .apply_change(
            ProfileKey::Id(&user.uid),
            &ProfileChange::new().paypal_cancel_at_period_end(true),
        )
        .await?;
    tracing::info!(uid = %user.uid, %subscription_id, "PayPal subscription cancelled");

    Ok(Json(json!({ "success": true })))
}

async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payload: Value =
        serde_json::from_slice(&body).map_err(|_| ApiError::bad_request("Invalid payload"))?;

    if let Some(webhook_id) = state.config.paypal.webhook_id() {
        let transmission = TransmissionHeaders::from_headers(&headers);
        let verified = client(&state)?
            .verify_webhook_signature(webhook_id, &transmission, &payload)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "PayPal webhook verification request failed");
                false
            });
        if !verified {
            tracing::warn!("PayPal webhook signature rejected");
            return Err(ApiError::bad_request("Invalid signature"));
        }
    } else {
        tracing::warn!("paypal.webhook_id is not configured; skipping signature verification");
    }

    let event: PaypalEvent =
        serde_json::from_value(payload).map_err(|_| ApiError::bad_request("Invalid payload"))?;
    tracing::info!(event_id = ?event.id, event_type = %event.event_type, "PayPal webhook received");

    match reconcile(&event, &state.config.paypal) {
        PaypalAction::Apply(reconciliation) => {
            apply_reconciliation(&state, &reconciliation).await?;
        }
        PaypalAction::PaymentFailed { subscription_id } => {
            tracing::warn!(?subscription_id, "PayPal payment failed; awaiting retry");
        }
        PaypalAction::Ignore { reason } => {
            tracing::debug!(%reason, "PayPal event ignored");
        }
    }

    Ok(Json(json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_body_is_camel_case() {
        let body: ActivateBody =
            serde_json::from_value(json!({"subscriptionId": "I-1", "planType": "annual"}))
                .unwrap();
        assert_eq!(body.subscription_id.as_deref(), Some("I-1"));
        assert_eq!(body.plan_type.as_deref(), Some("annual"));
    }

    #[test]
    fn cancel_reason_is_optional() {
        let body: CancelBody = serde_json::from_value(json!({})).unwrap();
        assert!(body.reason.is_none());
    }
}
