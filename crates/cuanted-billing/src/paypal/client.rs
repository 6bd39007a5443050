//! PayPal REST client.
//!
//! Calls authenticate with an OAuth client-credentials token that is
//! cached until a minute before it expires.

use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::config::PaypalConfig;
use crate::error::{BillingError, BillingResult};

const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Subset of a PayPal subscription resource.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaypalSubscription {
    pub id: String,
    #[serde(default)]
    pub status: String,
    pub plan_id: Option<String>,
    /// The profile id, set when the subscription is created.
    pub custom_id: Option<String>,
    pub subscriber: Option<Subscriber>,
    pub billing_info: Option<BillingInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Subscriber {
    pub payer_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BillingInfo {
    pub next_billing_time: Option<String>,
    #[serde(default)]
    pub cycle_executions: Vec<CycleExecution>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CycleExecution {
    pub tenure_type: String,
    #[serde(default)]
    pub cycles_remaining: i64,
}

impl PaypalSubscription {
    pub fn payer_id(&self) -> Option<&str> {
        self.subscriber.as_ref()?.payer_id.as_deref()
    }

    pub fn next_billing_time(&self) -> Option<&str> {
        self.billing_info.as_ref()?.next_billing_time.as_deref()
    }

    /// A trial cycle with cycles left.
    pub fn is_trialing(&self) -> bool {
        self.billing_info.as_ref().is_some_and(|info| {
            info.cycle_executions
                .iter()
                .any(|c| c.tenure_type == "TRIAL" && c.cycles_remaining > 0)
        })
    }
}

/// The `paypal-*` transmission headers of a webhook delivery.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransmissionHeaders {
    pub auth_algo: String,
    pub cert_url: String,
    pub transmission_id: String,
    pub transmission_sig: String,
    pub transmission_time: String,
}

impl TransmissionHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            auth_algo: get("paypal-auth-algo"),
            cert_url: get("paypal-cert-url"),
            transmission_id: get("paypal-transmission-id"),
            transmission_sig: get("paypal-transmission-sig"),
            transmission_time: get("paypal-transmission-time"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct VerificationResponse {
    verification_status: String,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct PaypalClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl PaypalClient {
    pub fn new(http: reqwest::Client, config: &PaypalConfig) -> BillingResult<Self> {
        let (Some(client_id), Some(client_secret)) = (
            config.client_id.clone().filter(|v| !v.is_empty()),
            config.client_secret.clone().filter(|v| !v.is_empty()),
        ) else {
            return Err(BillingError::NotConfigured("paypal.client_id/client_secret".into()));
        };
        Ok(Self {
            http,
            client_id,
            client_secret,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        })
    }

    pub async fn access_token(&self) -> BillingResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let token: TokenResponse = decode(response).await?;
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now()
                + Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_BUFFER),
        });
        tracing::debug!(expires_in = token.expires_in, "obtained PayPal access token");
        Ok(token.access_token)
    }

    pub async fn get_subscription(&self, id: &str) -> BillingResult<PaypalSubscription> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}/v1/billing/subscriptions/{id}", self.api_base))
            .bearer_auth(token)
            .send()
            .await?;
        decode(response).await
    }

    /// Cancels a subscription. PayPal answers 204 on success.
    pub async fn cancel_subscription(&self, id: &str, reason: &str) -> BillingResult<()> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}/v1/billing/subscriptions/{id}/cancel", self.api_base))
            .bearer_auth(token)
            .json(&json!({ "reason": reason }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(provider_error(status.as_u16(), response.text().await?));
        }
        tracing::info!(subscription = id, "cancelled PayPal subscription");
        Ok(())
    }

    /// Asks PayPal whether a webhook delivery is authentic.
    pub async fn verify_webhook_signature(
        &self,
        webhook_id: &str,
        headers: &TransmissionHeaders,
        event: &Value,
    ) -> BillingResult<bool> {
        let token = self.access_token().await?;
        let body = json!({
            "auth_algo": headers.auth_algo,
            "cert_url": headers.cert_url,
            "transmission_id": headers.transmission_id,
            "transmission_sig": headers.transmission_sig,
            "transmission_time": headers.transmission_time,
            "webhook_id": webhook_id,
            "webhook_event": event,
        });
        let response = self
            .http
            .post(format!("{}/v1/notifications/verify-webhook-signature", self.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let verification: VerificationResponse = decode(response).await?;
        Ok(verification.verification_status == "SUCCESS")
    }
}

fn provider_error(status: u16, message: String) -> BillingError {
    tracing::warn!(status, %message, "PayPal request failed");
    BillingError::Provider {
        provider: "PayPal",
        status,
        message,
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> BillingResult<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(provider_error(status.as_u16(), body));
    }
    serde_json::from_str(&body).map_err(|e| BillingError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn trial_needs_remaining_cycles() {
        let trialing: PaypalSubscription = serde_json::from_value(json!({
            "id": "I-1",
            "status": "ACTIVE",
            "billing_info": {
                "next_billing_time": "2026-11-15T10:00:00Z",
                "cycle_executions": [
                    {"tenure_type": "TRIAL", "cycles_remaining": 1},
                    {"tenure_type": "REGULAR", "cycles_remaining": 0}
                ]
            }
        }))
        .unwrap();
        assert!(trialing.is_trialing());
        assert_eq!(trialing.next_billing_time(), Some("2026-11-15T10:00:00Z"));

        let finished: PaypalSubscription = serde_json::from_value(json!({
            "id": "I-1",
            "billing_info": {"cycle_executions": [{"tenure_type": "TRIAL", "cycles_remaining": 0}]}
        }))
        .unwrap();
        assert!(!finished.is_trialing());
        assert!(!PaypalSubscription::default().is_trialing());
    }

    #[test]
    fn transmission_headers_default_to_empty() {
        let mut headers = HeaderMap::new();
        headers.insert("paypal-transmission-id", HeaderValue::from_static("tx-1"));
        headers.insert("paypal-auth-algo", HeaderValue::from_static("SHA256withRSA"));
        let parsed = TransmissionHeaders::from_headers(&headers);
        assert_eq!(parsed.transmission_id, "tx-1");
        assert_eq!(parsed.auth_algo, "SHA256withRSA");
        assert_eq!(parsed.cert_url, "");
    }

    #[test]
    fn client_requires_credentials() {
        let config = PaypalConfig {
            client_id: Some("id".into()),
            ..Default::default()
        };
        assert!(matches!(
            PaypalClient::new(reqwest::Client::new(), &config),
            Err(BillingError::NotConfigured(_))
        ));
    }
}
