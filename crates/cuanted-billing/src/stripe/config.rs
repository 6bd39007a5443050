use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub price_pro_monthly: Option<String>,
    pub price_pro_yearly: Option<String>,
    pub api_base: String,
    /// Maximum age of a webhook signature timestamp.
    #[serde(with = "humantime_serde")]
    pub webhook_tolerance: Duration,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            price_pro_monthly: None,
            price_pro_yearly: None,
            api_base: "https://api.stripe.com".into(),
            webhook_tolerance: Duration::from_secs(300),
        }
    }
}

impl StripeConfig {
    pub fn is_configured(&self) -> bool {
        self.secret_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Price for a checkout: yearly when asked for and configured,
    /// otherwise monthly.
    pub fn price_for(&self, price_type: Option<&str>) -> Option<&str> {
        fn non_empty(p: &Option<String>) -> Option<&str> {
            p.as_deref().filter(|p| !p.is_empty())
        }
        match (price_type, non_empty(&self.price_pro_yearly)) {
            (Some("yearly"), Some(yearly)) => Some(yearly),
            _ => non_empty(&self.price_pro_monthly),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(monthly: Option<&str>, yearly: Option<&str>) -> StripeConfig {
        StripeConfig {
            price_pro_monthly: monthly.map(String::from),
            price_pro_yearly: yearly.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn yearly_falls_back_to_monthly() {
        let both = config(Some("price_m"), Some("price_y"));
        assert_eq!(both.price_for(Some("yearly")), Some("price_y"));
        assert_eq!(both.price_for(Some("monthly")), Some("price_m"));
        assert_eq!(both.price_for(None), Some("price_m"));

        let monthly_only = config(Some("price_m"), None);
        assert_eq!(monthly_only.price_for(Some("yearly")), Some("price_m"));

        assert_eq!(config(None, Some("price_y")).price_for(None), None);
    }
}
