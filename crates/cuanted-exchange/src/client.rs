//! Binance REST client.
//!
//! Signed endpoints carry `timestamp` and `recvWindow` in the query string,
//! an HMAC-SHA256 hex `signature` over that query, and the API key in the
//! `X-MBX-APIKEY` header.

use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::config::BinanceEndpoints;
use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{
    ExchangeInfo, FuturesAccount, MarketType, OrderSide, PositionRisk, SpotAccount, TickerPrice,
};

#[derive(Clone)]
struct Credentials {
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct BinanceErrorBody {
    code: i64,
    msg: String,
}

#[derive(Clone)]
pub struct BinanceClient {
    http: reqwest::Client,
    spot_base: String,
    futures_base: String,
    recv_window_ms: u128,
    timeout: std::time::Duration,
    credentials: Option<Credentials>,
}

impl BinanceClient {
    /// Client for public market data only.
    pub fn public(http: reqwest::Client, endpoints: &BinanceEndpoints, testnet: bool) -> Self {
        Self {
            http,
            spot_base: endpoints.base(MarketType::Spot, testnet).to_string(),
            futures_base: endpoints.base(MarketType::Futures, testnet).to_string(),
            recv_window_ms: endpoints.recv_window.as_millis(),
            timeout: endpoints.request_timeout,
            credentials: None,
        }
    }

    pub fn new(
        http: reqwest::Client,
        endpoints: &BinanceEndpoints,
        testnet: bool,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        let mut client = Self::public(http, endpoints, testnet);
        client.credentials = Some(Credentials {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        });
        client
    }

    fn base(&self, market: MarketType) -> &str {
        match market {
            MarketType::Spot => &self.spot_base,
            MarketType::Futures => &self.futures_base,
        }
    }

    // ---- spot ----

    pub async fn account(&self) -> ExchangeResult<SpotAccount> {
        self.signed(Method::GET, MarketType::Spot, "/api/v3/account", &[])
            .await
    }

    pub async fn exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        self.public_get(MarketType::Spot, "/api/v3/exchangeInfo", &[])
            .await
    }

    pub async fn ticker_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let ticker: TickerPrice = self
            .public_get(MarketType::Spot, "/api/v3/ticker/price", &[("symbol", symbol)])
            .await?;
        Ok(ticker.price)
    }

    pub async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: &str,
    ) -> ExchangeResult<Value> {
        let order: Value = self
            .signed(
                Method::POST,
                MarketType::Spot,
                "/api/v3/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("side", side.as_str().to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", quantity.to_string()),
                ],
            )
            .await?;
        tracing::info!(symbol, %side, quantity, "spot market order placed");
        Ok(order)
    }

    // ---- USDT-M futures ----

    pub async fn futures_account(&self) -> ExchangeResult<FuturesAccount> {
        self.signed(Method::GET, MarketType::Futures, "/fapi/v2/account", &[])
            .await
    }

    pub async fn futures_exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        self.public_get(MarketType::Futures, "/fapi/v1/exchangeInfo", &[])
            .await
    }

    pub async fn futures_ticker_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let ticker: TickerPrice = self
            .public_get(
                MarketType::Futures,
                "/fapi/v1/ticker/price",
                &[("symbol", symbol)],
            )
            .await?;
        Ok(ticker.price)
    }

    pub async fn position_risk(&self, symbol: &str) -> ExchangeResult<Vec<PositionRisk>> {
        self.signed(
            Method::GET,
            MarketType::Futures,
            "/fapi/v2/positionRisk",
            &[("symbol", symbol.to_string())],
        )
        .await
    }

    pub async fn change_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<Value> {
        self.signed(
            Method::POST,
            MarketType::Futures,
            "/fapi/v1/leverage",
            &[
                ("symbol", symbol.to_string()),
                ("leverage", leverage.to_string()),
            ],
        )
        .await
    }

    pub async fn futures_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: &str,
        reduce_only: bool,
    ) -> ExchangeResult<Value> {
        let order: Value = self
            .signed(
                Method::POST,
                MarketType::Futures,
                "/fapi/v1/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("side", side.as_str().to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", quantity.to_string()),
                    ("reduceOnly", reduce_only.to_string()),
                ],
            )
            .await?;
        tracing::info!(symbol, %side, quantity, reduce_only, "futures market order placed");
        Ok(order)
    }

    // ---- public ----

    /// `BASE/QUOTE` pairs currently in `TRADING` status, sorted.
    pub async fn trading_pairs(&self, market: MarketType) -> ExchangeResult<Vec<String>> {
        let info = match market {
            MarketType::Spot => self.exchange_info().await?,
            MarketType::Futures => self.futures_exchange_info().await?,
        };
        let mut pairs: Vec<String> = info
            .symbols
            .iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.pair())
            .collect();
        pairs.sort();
        tracing::debug!(%market, count = pairs.len(), "fetched trading pairs");
        Ok(pairs)
    }

    // ---- transport ----

    async fn public_get<T: DeserializeOwned>(
        &self,
        market: MarketType,
        path: &str,
        params: &[(&str, &str)],
    ) -> ExchangeResult<T> {
        let url = format!("{}{}", self.base(market), path);
        let response = self
            .http
            .get(url)
            .query(params)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await?;
        decode(response).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        market: MarketType,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(ExchangeError::MissingCredentials)?;

        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        query.push(format!("timestamp={}", timestamp_ms()));
        query.push(format!("recvWindow={}", self.recv_window_ms));
        let query = query.join("&");
        let signature = sign(&credentials.api_secret, &query)?;

        let url = format!(
            "{}{}?{}&signature={}",
            self.base(market),
            path,
            query,
            signature
        );
        let response = self
            .http
            .request(method, url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .timeout(self.timeout)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ExchangeResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        if let Ok(err) = serde_json::from_str::<BinanceErrorBody>(&body) {
            tracing::warn!(status = status.as_u16(), code = err.code, msg = %err.msg, "Binance rejected request");
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                code: err.code,
                msg: err.msg,
            });
        }
        return Err(ExchangeError::Http {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(e.to_string()))
}

/// Hex HMAC-SHA256 of `payload` keyed with `secret`.
pub fn sign(secret: &str, payload: &str) -> ExchangeResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Signing(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn timestamp_ms() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}
