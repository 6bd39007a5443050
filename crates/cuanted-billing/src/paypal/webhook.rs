//! Maps PayPal webhook events and activations to profile changes.

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use cuanted_db_postgres::ProfileChange;

use super::client::PaypalSubscription;
use super::config::PaypalConfig;
use crate::{ProfileTarget, Reconciliation};

#[derive(Debug, Clone, Deserialize)]
pub struct PaypalEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub resource: Value,
}

/// What to do with a webhook event.
#[derive(Debug, Clone, PartialEq)]
pub enum PaypalAction {
    Apply(Reconciliation),
    /// PayPal retries failed payments itself; nothing is written.
    PaymentFailed { subscription_id: Option<String> },
    Ignore { reason: String },
}

/// Internal status for a PayPal subscription status.
pub fn map_status(status: &str) -> &'static str {
    match status {
        "ACTIVE" => "active",
        "CANCELLED" => "canceled",
        _ => "inactive",
    }
}

pub fn plan_type(plan_id: Option<&str>, config: &PaypalConfig) -> &'static str {
    match (plan_id, config.plan_annual.as_deref()) {
        (Some(plan), Some(annual)) if !annual.is_empty() && plan == annual => "annual",
        _ => "monthly",
    }
}

pub fn reconcile(event: &PaypalEvent, config: &PaypalConfig) -> PaypalAction {
    let resource = &event.resource;
    let resource_id = resource.get("id").and_then(Value::as_str);

    match event.event_type.as_str() {
        "BILLING.SUBSCRIPTION.ACTIVATED" => {
            let subscription = match PaypalSubscription::deserialize(resource) {
                Ok(subscription) => subscription,
                Err(e) => return ignore(format!("malformed subscription resource: {e}")),
            };
            let Some(user_id) = subscription.custom_id.clone().filter(|id| !id.is_empty()) else {
                tracing::error!(subscription = %subscription.id, "activated subscription has no custom_id");
                return ignore("missing custom_id".into());
            };
            let trialing = subscription.is_trialing();
            let next_billing = parse_time(subscription.next_billing_time());
            let change = ProfileChange::new()
                .paypal_subscriber_id(subscription.payer_id())
                .paypal_subscription_id(Some(subscription.id.as_str()))
                .paypal_plan_type(Some(plan_type(subscription.plan_id.as_deref(), config)))
                .paypal_status(Some(if trialing { "trialing" } else { "active" }))
                .paypal_next_billing_time(next_billing)
                .trial_ends_at(next_billing.filter(|_| trialing))
                .paypal_cancel_at_period_end(false);
            tracing::info!(user_id, subscription = %subscription.id, trialing, "PayPal subscription activated");
            PaypalAction::Apply(Reconciliation::new(ProfileTarget::Id(user_id), change))
        }
        "BILLING.SUBSCRIPTION.SUSPENDED" | "BILLING.SUBSCRIPTION.EXPIRED" => {
            let Some(id) = resource_id else {
                return ignore("missing subscription id".into());
            };
            let status = resource.get("status").and_then(Value::as_str).unwrap_or_default();
            let change = ProfileChange::new()
                .paypal_status(Some(map_status(status)))
                .paypal_cancel_at_period_end(false);
            tracing::info!(subscription = id, event = %event.event_type, "PayPal subscription stopped");
            PaypalAction::Apply(
                Reconciliation::new(ProfileTarget::PaypalSubscription(id.into()), change)
                    .deactivating_strategies(),
            )
        }
        "BILLING.SUBSCRIPTION.CANCELLED" => {
            let Some(id) = resource_id else {
                return ignore("missing subscription id".into());
            };
            // Stays usable until the paid period ends.
            let change = ProfileChange::new().paypal_cancel_at_period_end(true);
            PaypalAction::Apply(Reconciliation::new(
                ProfileTarget::PaypalSubscription(id.into()),
                change,
            ))
        }
        "BILLING.SUBSCRIPTION.RENEWED" | "PAYMENT.SALE.COMPLETED" => {
            let id = resource
                .get("billing_agreement_id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .or(resource_id);
            let Some(id) = id else {
                return ignore("missing subscription id".into());
            };
            let next_billing = parse_time(
                resource
                    .pointer("/billing_info/next_billing_time")
                    .and_then(Value::as_str),
            );
            let change = ProfileChange::new()
                .paypal_status(Some("active"))
                .trial_ends_at(None)
                .paypal_cancel_at_period_end(false)
                .paypal_next_billing_time(next_billing);
            PaypalAction::Apply(Reconciliation::new(
                ProfileTarget::PaypalSubscription(id.into()),
                change,
            ))
        }
        "BILLING.SUBSCRIPTION.PAYMENT.FAILED" => {
            tracing::warn!(subscription = ?resource_id, "PayPal payment failed");
            PaypalAction::PaymentFailed {
                subscription_id: resource_id.map(String::from),
            }
        }
        other => ignore(format!("unhandled event type {other}")),
    }
}

/// Profile change after the buyer approves a subscription in the browser.
pub fn activation_change(
    subscription: &PaypalSubscription,
    subscription_id: &str,
    plan_type: Option<&str>,
) -> ProfileChange {
    let status = if subscription.status == "ACTIVE" {
        "active"
    } else {
        "trialing"
    };
    ProfileChange::new()
        .paypal_subscriber_id(Some(subscription.payer_id().unwrap_or_default()))
        .paypal_subscription_id(Some(subscription_id))
        .paypal_plan_type(Some(plan_type.filter(|p| !p.is_empty()).unwrap_or("monthly")))
        .paypal_status(Some(status))
}

fn ignore(reason: String) -> PaypalAction {
    tracing::debug!(%reason, "ignoring PayPal event");
    PaypalAction::Ignore { reason }
}

fn parse_time(value: Option<&str>) -> Option<OffsetDateTime> {
    value.and_then(|v| OffsetDateTime::parse(v, &Rfc3339).ok())
}
