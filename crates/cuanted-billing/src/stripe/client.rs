//! Minimal Stripe REST client: form-encoded requests, bearer secret key.

use std::collections::HashMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::config::StripeConfig;
use crate::USER_ID_METADATA_KEY;
use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

/// Subset of a Stripe subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: String,
    pub customer: Option<String>,
    pub current_period_end: Option<i64>,
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: Option<Value>,
}

impl Subscription {
    pub fn user_id(&self) -> Option<&str> {
        self.metadata
            .get(USER_ID_METADATA_KEY)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Period end, read from the first item on newer API versions.
    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end.or_else(|| {
            self.items
                .as_ref()?
                .pointer("/data/0/current_period_end")?
                .as_i64()
        })
    }
}

/// Inputs for a subscription checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutParams<'a> {
    pub customer_id: &'a str,
    pub price_id: &'a str,
    pub user_id: &'a str,
    pub trial_days: u32,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(http: reqwest::Client, config: &StripeConfig) -> BillingResult<Self> {
        let secret_key = config
            .secret_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| BillingError::NotConfigured("stripe.secret_key".into()))?;
        Ok(Self {
            http,
            secret_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    pub async fn create_customer(
        &self,
        email: Option<&str>,
        user_id: &str,
    ) -> BillingResult<Customer> {
        let mut form = vec![(
            format!("metadata[{USER_ID_METADATA_KEY}]"),
            user_id.to_string(),
        )];
        if let Some(email) = email {
            form.push(("email".into(), email.to_string()));
        }
        let customer: Customer = self.post("/v1/customers", &form).await?;
        tracing::info!(customer = %customer.id, user_id, "created Stripe customer");
        Ok(customer)
    }

    pub async fn create_checkout_session(
        &self,
        params: &CheckoutParams<'_>,
    ) -> BillingResult<CheckoutSession> {
        let metadata_key = format!("metadata[{USER_ID_METADATA_KEY}]");
        let form = vec![
            ("customer".to_string(), params.customer_id.to_string()),
            ("mode".into(), "subscription".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("line_items[0][price]".into(), params.price_id.to_string()),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "subscription_data[trial_period_days]".into(),
                params.trial_days.to_string(),
            ),
            (
                format!("subscription_data[{metadata_key}]"),
                params.user_id.to_string(),
            ),
            ("success_url".into(), params.success_url.to_string()),
            ("cancel_url".into(), params.cancel_url.to_string()),
            (metadata_key, params.user_id.to_string()),
            ("allow_promotion_codes".into(), "true".into()),
            ("billing_address_collection".into(), "auto".into()),
            ("locale".into(), "es".into()),
        ];
        self.post("/v1/checkout/sessions", &form).await
    }

    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<PortalSession> {
        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), return_url.to_string()),
        ];
        self.post("/v1/billing_portal/sessions", &form).await
    }

    pub async fn retrieve_subscription(&self, id: &str) -> BillingResult<Subscription> {
        let response = self
            .http
            .get(format!("{}/v1/subscriptions/{id}", self.api_base))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        decode(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> BillingResult<T> {
        let response = self
            .http
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> BillingResult<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<StripeErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or(body);
        tracing::warn!(status = status.as_u16(), %message, "Stripe request failed");
        return Err(BillingError::Provider {
            provider: "Stripe",
            status: status.as_u16(),
            message,
        });
    }
    serde_json::from_str(&body).map_err(|e| BillingError::Decode(e.to_string()))
}
