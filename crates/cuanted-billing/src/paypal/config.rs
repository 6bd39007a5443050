use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaypalConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// `https://api-m.paypal.com` in production.
    pub api_base: String,
    /// Webhook signatures are verified only when this is set.
    pub webhook_id: Option<String>,
    pub plan_monthly: Option<String>,
    pub plan_annual: Option<String>,
}

impl Default for PaypalConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            api_base: "https://api-m.sandbox.paypal.com".into(),
            webhook_id: None,
            plan_monthly: None,
            plan_annual: None,
        }
    }
}

impl PaypalConfig {
    pub fn is_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|v| !v.is_empty());
        set(&self.client_id) && set(&self.client_secret)
    }

    pub fn webhook_id(&self) -> Option<&str> {
        self.webhook_id.as_deref().filter(|id| !id.is_empty())
    }
}
