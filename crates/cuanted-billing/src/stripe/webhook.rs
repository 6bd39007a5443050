//! Maps verified Stripe events to profile changes.

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use cuanted_db_postgres::ProfileChange;

use super::client::{StripeClient, Subscription};
use crate::error::{BillingError, BillingResult};
use crate::plan::Plan;
use crate::{ProfileTarget, Reconciliation, USER_ID_METADATA_KEY};

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

/// `pro` while a subscription is active or trialing.
pub fn plan_for_status(status: &str) -> Plan {
    match status {
        "active" | "trialing" => Plan::Pro,
        _ => Plan::Free,
    }
}

/// Builds the profile change for an event. `Ok(None)` when the event is
/// not handled or does not identify a user.
pub async fn reconcile(
    event: &StripeEvent,
    client: &StripeClient,
) -> BillingResult<Option<Reconciliation>> {
    let object = &event.data.object;
    let reconciliation = match event.kind.as_str() {
        "checkout.session.completed" => {
            let user_id = metadata_user_id(object);
            let subscription_id = object.get("subscription").and_then(Value::as_str);
            let (Some(user_id), Some(subscription_id)) = (user_id, subscription_id) else {
                tracing::info!(event = %event.id, "checkout session without user or subscription");
                return Ok(None);
            };
            let subscription = client.retrieve_subscription(subscription_id).await?;
            let change = ProfileChange::new()
                .plan(Plan::Pro.as_str())
                .stripe_customer_id(object.get("customer").and_then(Value::as_str))
                .stripe_subscription_id(Some(subscription.id.as_str()))
                .stripe_subscription_status(Some(subscription.status.as_str()))
                .stripe_current_period_end(timestamp(subscription.period_end()))
                .trial_ends_at(timestamp(subscription.trial_end));
            tracing::info!(user_id, "checkout completed, upgrading to pro");
            Some(Reconciliation::new(ProfileTarget::Id(user_id.to_string()), change))
        }
        "customer.subscription.updated" => {
            let subscription = parse_subscription(object)?;
            target_for(&subscription).map(|target| {
                let change = ProfileChange::new()
                    .plan(plan_for_status(&subscription.status).as_str())
                    .stripe_subscription_status(Some(subscription.status.as_str()))
                    .stripe_current_period_end(timestamp(subscription.period_end()))
                    .trial_ends_at(timestamp(subscription.trial_end));
                Reconciliation::new(target, change)
            })
        }
        "customer.subscription.deleted" => {
            let subscription = parse_subscription(object)?;
            target_for(&subscription).map(|target| {
                let change = ProfileChange::new()
                    .plan(Plan::Free.as_str())
                    .stripe_subscription_status(Some("canceled"))
                    .stripe_subscription_id(None)
                    .stripe_current_period_end(None)
                    .trial_ends_at(None);
                tracing::info!(subscription = %subscription.id, "subscription deleted, downgrading");
                Reconciliation::new(target, change)
            })
        }
        "invoice.payment_failed" | "invoice.payment_succeeded" => {
            let Some(subscription_id) = invoice_subscription_id(object) else {
                return Ok(None);
            };
            let subscription = client.retrieve_subscription(subscription_id).await?;
            target_for(&subscription).map(|target| {
                let change = if event.kind == "invoice.payment_failed" {
                    ProfileChange::new().stripe_subscription_status(Some("past_due"))
                } else {
                    ProfileChange::new()
                        .plan(Plan::Pro.as_str())
                        .stripe_subscription_status(Some(subscription.status.as_str()))
                        .stripe_current_period_end(timestamp(subscription.period_end()))
                };
                Reconciliation::new(target, change)
            })
        }
        other => {
            tracing::debug!(event = %event.id, kind = other, "unhandled Stripe event");
            None
        }
    };
    Ok(reconciliation)
}

fn parse_subscription(object: &Value) -> BillingResult<Subscription> {
    Subscription::deserialize(object).map_err(|e| BillingError::Decode(e.to_string()))
}

fn metadata_user_id(object: &Value) -> Option<&str> {
    object
        .get("metadata")?
        .get(USER_ID_METADATA_KEY)?
        .as_str()
        .filter(|id| !id.is_empty())
}

/// Metadata user id, or the customer when the metadata is missing.
fn target_for(subscription: &Subscription) -> Option<ProfileTarget> {
    match (subscription.user_id(), subscription.customer.as_deref()) {
        (Some(user_id), _) => Some(ProfileTarget::Id(user_id.to_string())),
        (None, Some(customer)) => Some(ProfileTarget::StripeCustomer(customer.to_string())),
        (None, None) => None,
    }
}

/// Invoices name their subscription at the top level on older API
/// versions and under `parent.subscription_details` on newer ones.
fn invoice_subscription_id(invoice: &Value) -> Option<&str> {
    invoice
        .get("subscription")
        .and_then(Value::as_str)
        .or_else(|| {
            invoice
                .pointer("/parent/subscription_details/subscription")
                .and_then(Value::as_str)
        })
}

fn timestamp(seconds: Option<i64>) -> Option<OffsetDateTime> {
    seconds.and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stripe::StripeConfig;
    use cuanted_db_postgres::BindValue;
    use serde_json::json;

    fn offline_client() -> StripeClient {
        let config = StripeConfig {
            secret_key: Some("sk_test".into()),
            api_base: "http://127.0.0.1:1".into(),
            ..Default::default()
        };
        StripeClient::new(reqwest::Client::new(), &config).unwrap()
    }

    fn event(kind: &str, object: Value) -> StripeEvent {
        serde_json::from_value(json!({
            "id": "evt_1",
            "type": kind,
            "data": {"object": object}
        }))
        .unwrap()
    }

    fn text(reconciliation: &Reconciliation, column: &str) -> Option<BindValue> {
        reconciliation.change.as_update_set().get(column).cloned()
    }

    #[test]
    fn only_active_and_trialing_are_pro() {
        assert_eq!(plan_for_status("active"), Plan::Pro);
        assert_eq!(plan_for_status("trialing"), Plan::Pro);
        assert_eq!(plan_for_status("past_due"), Plan::Free);
        assert_eq!(plan_for_status("canceled"), Plan::Free);
    }

    #[tokio::test]
    async fn subscription_update_downgrades_unpaid() {
        let event = event(
            "customer.subscription.updated",
            json!({
                "id": "sub_1",
                "status": "unpaid",
                "current_period_end": 1_800_000_000,
                "metadata": {"supabase_user_id": "uid-1"}
            }),
        );
        let rec = reconcile(&event, &offline_client()).await.unwrap().unwrap();
        assert_eq!(rec.target, ProfileTarget::Id("uid-1".into()));
        assert_eq!(text(&rec, "plan"), Some(BindValue::Text(Some("free".into()))));
        assert_eq!(
            text(&rec, "stripe_current_period_end"),
            Some(BindValue::Timestamp(OffsetDateTime::from_unix_timestamp(1_800_000_000).ok()))
        );
        assert_eq!(text(&rec, "trial_ends_at"), Some(BindValue::Timestamp(None)));
        assert!(!rec.deactivate_strategies);
    }

    #[tokio::test]
    async fn deleted_subscription_falls_back_to_customer() {
        let event = event(
            "customer.subscription.deleted",
            json!({"id": "sub_1", "status": "canceled", "customer": "cus_9"}),
        );
        let rec = reconcile(&event, &offline_client()).await.unwrap().unwrap();
        assert_eq!(rec.target, ProfileTarget::StripeCustomer("cus_9".into()));
        assert_eq!(text(&rec, "stripe_subscription_id"), Some(BindValue::Text(None)));
        assert_eq!(
            text(&rec, "stripe_subscription_status"),
            Some(BindValue::Text(Some("canceled".into())))
        );
    }

    #[tokio::test]
    async fn unhandled_and_anonymous_events_are_skipped() {
        let client = offline_client();
        let unknown = event("customer.created", json!({"id": "cus_1"}));
        assert!(reconcile(&unknown, &client).await.unwrap().is_none());

        let anonymous = event(
            "customer.subscription.updated",
            json!({"id": "sub_1", "status": "active"}),
        );
        assert!(reconcile(&anonymous, &client).await.unwrap().is_none());

        let no_subscription = event("checkout.session.completed", json!({"id": "cs_1"}));
        assert!(reconcile(&no_subscription, &client).await.unwrap().is_none());
    }

    #[test]
    fn invoice_subscription_id_supports_both_layouts() {
        assert_eq!(
            invoice_subscription_id(&json!({"subscription": "sub_old"})),
            Some("sub_old")
        );
        assert_eq!(
            invoice_subscription_id(&json!({
                "parent": {"subscription_details": {"subscription": "sub_new"}}
            })),
            Some("sub_new")
        );
        assert_eq!(invoice_subscription_id(&json!({"subscription": null})), None);
    }
}
