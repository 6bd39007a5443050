//! Stripe checkout, billing portal and webhook.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use cuanted_api::{ApiError, ApiResult};
use cuanted_auth::AuthUser;
use cuanted_billing::TRIAL_DAYS;
use cuanted_billing::stripe::{CheckoutParams, StripeClient, StripeEvent, reconcile, verify_signature};
use cuanted_db_postgres::{ProfileChange, ProfileKey, ProfileStorage};
use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;

use super::{JsonBody, apply_reconciliation, request_origin};
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/stripe/checkout", post(checkout))
        .route("/api/stripe/portal", post(portal))
        .route("/api/stripe/webhook", post(webhook))
}

fn client(state: &AppState) -> ApiResult<Arc<StripeClient>> {
    state.stripe.clone().ok_or_else(|| {
        tracing::error!("Stripe request received but stripe.secret_key is not configured");
        ApiError::internal("Payments are not available")
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutBody {
    price_type: Option<String>,
    success_url: Option<String>,
    cancel_url: Option<String>,
}

async fn checkout(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<CheckoutBody>,
) -> ApiResult<Json<Value>> {
    let stripe = client(&state)?;
    let price_id = state
        .config
        .stripe
        .price_for(body.price_type.as_deref())
        .ok_or_else(|| ApiError::bad_request("Invalid price"))?;

    let profiles = ProfileStorage::new(&state.pool);
    let customer_id = match profiles.stripe_customer_id(&user.uid).await? {
        Some(id) => id,
        None => {
            let customer = stripe
                .create_customer(user.email.as_deref(), &user.uid)
                .await?;
            profiles
                .apply_change(
                    ProfileKey::Id(&user.uid),
                    &ProfileChange::new().stripe_customer_id(Some(customer.id.as_str())),
                )
                .await?;
            customer.id
        }
    };

    let origin = request_origin(&headers, &state.config.server.site_url);
    let success_url = body
        .success_url
        .unwrap_or_else(|| format!("{origin}/dashboard/estrategias?checkout=success"));
    let cancel_url = body
        .cancel_url
        .unwrap_or_else(|| format!("{origin}/precios?checkout=cancelled"));

    let session = stripe
        .create_checkout_session(&CheckoutParams {
            customer_id: &customer_id,
            price_id,
            user_id: &user.uid,
            trial_days: TRIAL_DAYS,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await?;
    tracing::info!(uid = %user.uid, session = %session.id, "checkout session created");

    Ok(Json(json!({ "sessionId": session.id, "url": session.url })))
}

async fn portal(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let stripe = client(&state)?;
    let customer_id = ProfileStorage::new(&state.pool)
        .stripe_customer_id(&user.uid)
        .await?
        .ok_or_else(|| ApiError::not_found("No subscription information found"))?;

    let origin = request_origin(&headers, &state.config.server.site_url);
    let session = stripe
        .create_portal_session(&customer_id, &format!("{origin}/dashboard/configuracion"))
        .await?;
    Ok(Json(json!({ "url": session.url })))
}

async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("No signature"))?;

    let config = &state.config.stripe;
    let Some(secret) = config.webhook_secret.as_deref().filter(|s| !s.is_empty()) else {
        tracing::error!("Stripe webhook received but stripe.webhook_secret is not configured");
        return Err(ApiError::internal("Webhook not configured"));
    };

    verify_signature(
        &body,
        signature,
        secret,
        config.webhook_tolerance,
        OffsetDateTime::now_utc().unix_timestamp(),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "Stripe webhook signature verification failed");
        ApiError::bad_request("Invalid signature")
    })?;

    let event: StripeEvent =
        serde_json::from_slice(&body).map_err(|_| ApiError::bad_request("Invalid payload"))?;
    tracing::info!(event_id = %event.id, kind = %event.kind, "Stripe webhook received");

    let stripe = client(&state)?;
    match reconcile(&event, &stripe).await? {
        Some(reconciliation) => {
            apply_reconciliation(&state, &reconciliation).await?;
        }
        None => tracing::debug!(kind = %event.kind, "Stripe event ignored"),
    }

    Ok(Json(json!({ "received": true })))
}
