//! Binance response payloads and the enums shared across the crate.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Spot,
    Futures,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::Futures => "futures",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spot" => Ok(MarketType::Spot),
            "futures" => Ok(MarketType::Futures),
            other => Err(format!("Unknown market type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `GET /api/v3/account`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotAccount {
    pub account_type: Option<String>,
    #[serde(default)]
    pub can_trade: bool,
    #[serde(default)]
    pub can_deposit: bool,
    #[serde(default)]
    pub can_withdraw: bool,
    #[serde(default)]
    pub balances: Vec<Balance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
}

/// `GET /fapi/v2/account`.
#[derive(Debug, Clone, Deserialize)]
pub struct FuturesAccount {
    #[serde(default)]
    pub assets: Vec<FuturesAsset>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesAsset {
    pub asset: String,
    pub available_balance: Decimal,
}

/// `GET /fapi/v2/positionRisk` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    #[serde(default = "both")]
    pub position_side: String,
    pub position_amt: Decimal,
}

fn both() -> String {
    "BOTH".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TickerPrice {
    pub price: Decimal,
}

const SPOT_NOTIONAL: &[(&str, &str)] = &[("MIN_NOTIONAL", "minNotional"), ("NOTIONAL", "minNotional")];
const FUTURES_NOTIONAL: &[(&str, &str)] = &[
    ("MIN_NOTIONAL", "notional"),
    ("MIN_NOTIONAL", "minNotional"),
    ("NOTIONAL", "notional"),
    ("NOTIONAL", "minNotional"),
];

/// The symbol filters the validator checks. Missing values are zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolFilters {
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
    pub min_notional: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub tick_size: Decimal,
    pub has_price_filter: bool,
}

impl SymbolInfo {
    pub fn pair(&self) -> String {
        format!("{}/{}", self.base_asset, self.quote_asset)
    }

    fn filter(&self, kind: &str) -> Option<&Value> {
        self.filters
            .iter()
            .find(|f| f.get("filterType").and_then(Value::as_str) == Some(kind))
    }

    fn filter_decimal(&self, kind: &str, field: &str) -> Decimal {
        self.filter(kind)
            .and_then(|f| f.get(field))
            .and_then(|v| match v {
                Value::String(s) => Decimal::from_str(s).ok(),
                Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Spot filters read `MIN_NOTIONAL.minNotional` and then
    /// `NOTIONAL.minNotional`; futures use `notional` first.
    pub fn filters(&self, market: MarketType) -> SymbolFilters {
        let sources = match market {
            MarketType::Spot => SPOT_NOTIONAL,
            MarketType::Futures => FUTURES_NOTIONAL,
        };
        let min_notional = sources
            .iter()
            .map(|(kind, field)| self.filter_decimal(kind, field))
            .find(|v| !v.is_zero())
            .unwrap_or_default();

        SymbolFilters {
            min_qty: self.filter_decimal("LOT_SIZE", "minQty"),
            max_qty: self.filter_decimal("LOT_SIZE", "maxQty"),
            step_size: self.filter_decimal("LOT_SIZE", "stepSize"),
            min_notional,
            min_price: self.filter_decimal("PRICE_FILTER", "minPrice"),
            max_price: self.filter_decimal("PRICE_FILTER", "maxPrice"),
            tick_size: self.filter_decimal("PRICE_FILTER", "tickSize"),
            has_price_filter: self.filter("PRICE_FILTER").is_some(),
        }
    }
}
