//! Binance endpoint configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::MarketType;

/// Base URLs for the spot and futures APIs, production and testnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinanceEndpoints {
    pub spot: String,
    pub spot_testnet: String,
    pub futures: String,
    pub futures_testnet: String,
    /// `recvWindow` sent with signed requests.
    #[serde(with = "humantime_serde")]
    pub recv_window: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for BinanceEndpoints {
    fn default() -> Self {
        Self {
            spot: "https://api.binance.com".into(),
            spot_testnet: "https://testnet.binance.vision".into(),
            futures: "https://fapi.binance.com".into(),
            futures_testnet: "https://testnet.binancefuture.com".into(),
            recv_window: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl BinanceEndpoints {
    /// All four base URLs pointed at one host. Used by tests.
    pub fn single(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            spot: base.clone(),
            spot_testnet: base.clone(),
            futures: base.clone(),
            futures_testnet: base,
            ..Default::default()
        }
    }

    pub fn base(&self, market: MarketType, testnet: bool) -> &str {
        let url = match (market, testnet) {
            (MarketType::Spot, false) => &self.spot,
            (MarketType::Spot, true) => &self.spot_testnet,
            (MarketType::Futures, false) => &self.futures,
            (MarketType::Futures, true) => &self.futures_testnet,
        };
        url.trim_end_matches('/')
    }
}
