//! Trading-signal validation.
//!
//! A [`Signal`] names a symbol, an action and one sizing rule. [`validate`]
//! loads balances, symbol filters and the price through [`MarketData`],
//! computes the order quantity, truncates it to the symbol's step size and
//! checks it against the exchange limits and the account's funds. The
//! result is either an order that can be placed as-is or a [`Rejection`]
//! listing every problem found.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::client::BinanceClient;
use crate::error::ExchangeResult;
use crate::types::{MarketType, OrderSide, SymbolFilters, SymbolInfo};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
    Long,
    Short,
}

impl Action {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(Action::Buy),
            "sell" => Some(Action::Sell),
            "long" => Some(Action::Long),
            "short" => Some(Action::Short),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Long => "long",
            Action::Short => "short",
        }
    }

    pub fn market(&self) -> MarketType {
        match self {
            Action::Buy | Action::Sell => MarketType::Spot,
            Action::Long | Action::Short => MarketType::Futures,
        }
    }

    /// Maps a TradingView `buy`/`sell` onto the action for `market`.
    pub fn for_market(buy: bool, market: MarketType) -> Self {
        match (market, buy) {
            (MarketType::Spot, true) => Action::Buy,
            (MarketType::Spot, false) => Action::Sell,
            (MarketType::Futures, true) => Action::Long,
            (MarketType::Futures, false) => Action::Short,
        }
    }

    /// Order side. Closing a position trades against its direction.
    pub fn side(&self, closing: bool) -> OrderSide {
        match (self, closing) {
            (Action::Buy, _) | (Action::Long, false) | (Action::Short, true) => OrderSide::Buy,
            (Action::Sell, _) | (Action::Short, false) | (Action::Long, true) => OrderSide::Sell,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the order size is derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sizing {
    /// Base-asset quantity.
    Quantity(Decimal),
    /// Share of the relevant balance, in (0, 100].
    Percentage(Decimal),
    /// Quote amount (USDT).
    UsdtAmount(Decimal),
}

/// Loosely-typed signal as received or assembled from a strategy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignalRequest {
    pub symbol: Option<String>,
    pub action: Option<String>,
    #[serde(alias = "qty")]
    pub quantity: Option<Decimal>,
    pub percentage: Option<Decimal>,
    pub usdt_amount: Option<Decimal>,
    pub price: Option<Decimal>,
    pub leverage: Option<u32>,
    #[serde(default)]
    pub close_position: bool,
}

/// A signal whose fields passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub action: Action,
    pub sizing: Sizing,
    pub price: Option<Decimal>,
    pub leverage: u32,
    pub close_position: bool,
}

impl SignalRequest {
    /// Field checks: symbol and action present, action known, exactly one
    /// sizing field within range.
    pub fn into_signal(self) -> Result<Signal, Rejection> {
        let mut errors = Vec::new();

        let symbol = self
            .symbol
            .as_deref()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty());
        let raw_action = self.action.as_deref().map(str::trim).filter(|a| !a.is_empty());

        let missing: Vec<&str> = [
            ("symbol", symbol.is_none()),
            ("action", raw_action.is_none()),
        ]
        .iter()
        .filter(|(_, missing)| *missing)
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            errors.push(format!("Missing fields: {}", missing.join(", ")));
        }

        let action = raw_action.and_then(|raw| {
            let parsed = Action::parse(raw);
            if parsed.is_none() {
                errors.push(format!(
                    "Invalid action '{raw}'. Allowed actions: buy, sell, long, short"
                ));
            }
            parsed
        });

        let sizing = match (self.quantity, self.percentage, self.usdt_amount) {
            (Some(q), None, None) if q > Decimal::ZERO => Some(Sizing::Quantity(q)),
            (Some(_), None, None) => {
                errors.push("quantity must be greater than 0".into());
                None
            }
            (None, Some(p), None) if p > Decimal::ZERO && p <= HUNDRED => {
                Some(Sizing::Percentage(p))
            }
            (None, Some(_), None) => {
                errors.push("percentage must be greater than 0 and at most 100".into());
                None
            }
            (None, None, Some(u)) if u > Decimal::ZERO => Some(Sizing::UsdtAmount(u)),
            (None, None, Some(_)) => {
                errors.push("usdt_amount must be greater than 0".into());
                None
            }
            (None, None, None) => {
                errors.push("One of quantity, percentage or usdt_amount is required".into());
                None
            }
            _ => {
                errors.push("Only one of quantity, percentage or usdt_amount may be set".into());
                None
            }
        };

        let leverage = self.leverage.unwrap_or(1);
        if leverage == 0 {
            errors.push("leverage must be at least 1".into());
        }
        if let Some(price) = self.price
            && price <= Decimal::ZERO
        {
            errors.push("price must be greater than 0".into());
        }

        match (symbol, action, sizing) {
            (Some(symbol), Some(action), Some(sizing)) if errors.is_empty() => Ok(Signal {
                symbol,
                action,
                sizing,
                price: self.price,
                leverage: if action.market() == MarketType::Futures {
                    leverage
                } else {
                    1
                },
                close_position: action.market() == MarketType::Futures && self.close_position,
            }),
            _ => Err(Rejection { errors }),
        }
    }
}

/// Why a signal cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub errors: Vec<String>,
}

impl Rejection {
    fn one(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
        }
    }

    pub fn message(&self) -> String {
        self.errors.join("\n")
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for Rejection {}

/// An order that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOrder {
    pub symbol: String,
    pub action: Action,
    pub market: MarketType,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Quantity formatted with the step size's precision, ready to send.
    pub quantity_text: String,
    pub price: Decimal,
    pub leverage: Option<u32>,
    pub reduce_only: bool,
    /// Set when the quantity was truncated or capped.
    pub adjustment: Option<String>,
    pub summary: String,
}

/// Account and market lookups the validator needs.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Free spot balance per asset.
    async fn spot_balances(&self) -> ExchangeResult<HashMap<String, Decimal>>;

    /// Available futures margin per asset.
    async fn futures_balances(&self) -> ExchangeResult<HashMap<String, Decimal>>;

    async fn symbol_info(
        &self,
        market: MarketType,
        symbol: &str,
    ) -> ExchangeResult<Option<SymbolInfo>>;

    async fn price(&self, market: MarketType, symbol: &str) -> ExchangeResult<Decimal>;

    /// Signed size of the one-way (`BOTH`) position, if any.
    async fn position_amount(&self, symbol: &str) -> ExchangeResult<Option<Decimal>>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()>;
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn spot_balances(&self) -> ExchangeResult<HashMap<String, Decimal>> {
        let account = self.account().await?;
        Ok(account
            .balances
            .into_iter()
            .map(|b| (b.asset, b.free))
            .collect())
    }

    async fn futures_balances(&self) -> ExchangeResult<HashMap<String, Decimal>> {
        let account = self.futures_account().await?;
        Ok(account
            .assets
            .into_iter()
            .map(|a| (a.asset, a.available_balance))
            .collect())
    }

    async fn symbol_info(
        &self,
        market: MarketType,
        symbol: &str,
    ) -> ExchangeResult<Option<SymbolInfo>> {
        let info = match market {
            MarketType::Spot => self.exchange_info().await?,
            MarketType::Futures => self.futures_exchange_info().await?,
        };
        Ok(info.symbols.into_iter().find(|s| s.symbol == symbol))
    }

    async fn price(&self, market: MarketType, symbol: &str) -> ExchangeResult<Decimal> {
        match market {
            MarketType::Spot => self.ticker_price(symbol).await,
            MarketType::Futures => self.futures_ticker_price(symbol).await,
        }
    }

    async fn position_amount(&self, symbol: &str) -> ExchangeResult<Option<Decimal>> {
        let positions = self.position_risk(symbol).await?;
        Ok(positions
            .into_iter()
            .find(|p| p.symbol == symbol && p.position_side == "BOTH")
            .map(|p| p.position_amt))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        self.change_leverage(symbol, leverage).await.map(|_| ())
    }
}

/// Validates `signal` against live account and market data.
pub async fn validate<M: MarketData + ?Sized>(
    market: &M,
    signal: &Signal,
) -> Result<ValidatedOrder, Rejection> {
    tracing::info!(symbol = %signal.symbol, action = %signal.action, "validating signal");
    let result = match signal.action.market() {
        MarketType::Spot => validate_spot(market, signal).await,
        MarketType::Futures => validate_futures(market, signal).await,
    };
    match &result {
        Ok(order) => tracing::info!(summary = %order.summary, "signal validated"),
        Err(rejection) => tracing::warn!(errors = %rejection, "signal rejected"),
    }
    result
}

async fn load_symbol<M: MarketData + ?Sized>(
    market: &M,
    kind: MarketType,
    symbol: &str,
) -> Result<SymbolInfo, Rejection> {
    match market.symbol_info(kind, symbol).await {
        Ok(Some(info)) => Ok(info),
        Ok(None) => Err(Rejection::one(format!(
            "Symbol '{symbol}' does not exist on {kind}"
        ))),
        Err(e) => Err(Rejection::one(format!(
            "Could not load {kind} symbol information: {}",
            e.user_message()
        ))),
    }
}

async fn resolve_price<M: MarketData + ?Sized>(
    market: &M,
    kind: MarketType,
    signal: &Signal,
) -> Result<Decimal, Rejection> {
    if let Some(price) = signal.price {
        return Ok(price);
    }
    match market.price(kind, &signal.symbol).await {
        Ok(price) if price > Decimal::ZERO => Ok(price),
        Ok(_) | Err(_) => Err(Rejection::one(format!(
            "Could not get the price for '{}' on {}",
            signal.symbol,
            kind.as_str().to_uppercase()
        ))),
    }
}

// Sizing arithmetic is checked; an overflow rejects the signal.
fn unsizable() -> Rejection {
    Rejection::one("Could not determine the quantity to trade.")
}

fn divide(amount: Decimal, price: Decimal) -> Result<Decimal, Rejection> {
    amount.checked_div(price).ok_or_else(unsizable)
}

fn multiply(a: Decimal, b: Decimal) -> Result<Decimal, Rejection> {
    a.checked_mul(b).ok_or_else(unsizable)
}

/// `percent` percent of `amount`.
fn share(amount: Decimal, percent: Decimal) -> Result<Decimal, Rejection> {
    divide(multiply(amount, percent)?, HUNDRED)
}

/// Floors `quantity` to a multiple of `step`. A zero step leaves it as is.
pub fn truncate_to_step(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return quantity;
    }
    let Some(steps) = quantity.checked_div(step) else {
        return quantity;
    };
    let mut truncated = steps.floor() * step;
    truncated.rescale(step.normalize().scale());
    truncated
}

/// Rounds `price` to the precision of `tick`.
fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    price.round_dp(tick.normalize().scale())
}

struct SteppedQuantity {
    quantity: Decimal,
    text: String,
    adjustment: Option<String>,
}

fn apply_step(quantity: Decimal, filters: &SymbolFilters) -> SteppedQuantity {
    let truncated = truncate_to_step(quantity, filters.step_size);
    let text = if filters.step_size > Decimal::ZERO {
        truncated.to_string()
    } else {
        truncated.normalize().to_string()
    };
    let adjustment = (truncated != quantity).then(|| {
        tracing::info!(original = %quantity, %truncated, step = %filters.step_size, "quantity truncated to step size");
        format!(
            "Quantity adjusted from {} to {} to match step size {}.",
            quantity.normalize(),
            truncated.normalize(),
            filters.step_size.normalize()
        )
    });
    SteppedQuantity {
        quantity: truncated,
        text,
        adjustment,
    }
}

fn check_lot_size(errors: &mut Vec<String>, quantity: Decimal, filters: &SymbolFilters, base: &str) {
    if quantity < filters.min_qty {
        errors.push(format!(
            "Quantity {} {base} is below the minimum of {} {base}",
            quantity.normalize(),
            filters.min_qty.normalize()
        ));
    }
    if filters.max_qty > Decimal::ZERO && quantity > filters.max_qty {
        errors.push(format!(
            "Quantity {} {base} exceeds the maximum of {} {base}",
            quantity.normalize(),
            filters.max_qty.normalize()
        ));
    }
}

async fn validate_spot<M: MarketData + ?Sized>(
    market: &M,
    signal: &Signal,
) -> Result<ValidatedOrder, Rejection> {
    let balances = market.spot_balances().await.map_err(|e| {
        Rejection::one(format!(
            "Could not load the spot account: {}",
            e.user_message()
        ))
    })?;
    let info = load_symbol(market, MarketType::Spot, &signal.symbol).await?;
    let (base, quote) = (info.base_asset.as_str(), info.quote_asset.as_str());
    let buying = signal.action == Action::Buy;

    let funding_asset = if buying { quote } else { base };
    let available = balances.get(funding_asset).copied().unwrap_or_default();
    if available.is_zero() {
        return Err(Rejection::one(format!("Insufficient funds in {funding_asset}")));
    }

    let price = resolve_price(market, MarketType::Spot, signal).await?;

    let quantity = match signal.sizing {
        Sizing::Quantity(q) => q,
        Sizing::Percentage(p) if buying => divide(share(available, p)?, price)?,
        Sizing::Percentage(p) => share(available, p)?,
        Sizing::UsdtAmount(amount) => divide(amount, price)?,
    };

    let filters = info.filters(MarketType::Spot);
    let sized = apply_step(quantity, &filters);
    if sized.quantity.is_zero() {
        return Err(unsizable());
    }

    let mut errors = Vec::new();
    check_lot_size(&mut errors, sized.quantity, &filters, base);

    let notional = multiply(sized.quantity, price)?;
    if filters.min_notional > Decimal::ZERO && notional < filters.min_notional {
        errors.push(format!(
            "Order value {notional:.2} {quote} is below the minimum of {:.2} {quote}",
            filters.min_notional
        ));
    }

    if buying && available < notional {
        errors.push(format!(
            "Insufficient funds in {quote}: {notional:.2} required, {available:.2} available"
        ));
    } else if !buying && available < sized.quantity {
        errors.push(format!(
            "Insufficient funds in {base}: {:.8} required, {available:.8} available",
            sized.quantity
        ));
    }

    if !errors.is_empty() {
        return Err(Rejection { errors });
    }

    let summary = format!(
        "{}SPOT: {} {} {base} at {} {quote}",
        sized
            .adjustment
            .as_deref()
            .map(|a| format!("{a}\n"))
            .unwrap_or_default(),
        signal.action.as_str().to_uppercase(),
        sized.text,
        price.normalize()
    );
    Ok(ValidatedOrder {
        symbol: signal.symbol.clone(),
        action: signal.action,
        market: MarketType::Spot,
        side: signal.action.side(false),
        quantity: sized.quantity,
        quantity_text: sized.text,
        price,
        leverage: None,
        reduce_only: false,
        adjustment: sized.adjustment,
        summary,
    })
}

async fn validate_futures<M: MarketData + ?Sized>(
    market: &M,
    signal: &Signal,
) -> Result<ValidatedOrder, Rejection> {
    let balances = market.futures_balances().await.map_err(|e| {
        Rejection::one(format!(
            "Could not load the futures account: {}",
            e.user_message()
        ))
    })?;
    let info = load_symbol(market, MarketType::Futures, &signal.symbol).await?;
    let (base, quote) = (info.base_asset.as_str(), info.quote_asset.as_str());
    let symbol = signal.symbol.as_str();
    let closing = signal.close_position;
    let leverage = Decimal::from(signal.leverage.max(1));

    // Closing sizes against the open position, opening against margin.
    let (available, open_position) = if closing {
        let amount = market.position_amount(symbol).await.map_err(|e| {
            Rejection::one(format!(
                "Could not load the open position: {}",
                e.user_message()
            ))
        })?;
        match amount {
            Some(amount) if !amount.is_zero() => (amount.abs(), Some(amount)),
            _ => {
                return Err(Rejection::one(format!(
                    "No open position to close in {symbol}"
                )));
            }
        }
    } else {
        let available = balances.get(quote).copied().unwrap_or_default();
        if available.is_zero() {
            return Err(Rejection::one(format!("Insufficient funds in {quote}")));
        }
        (available, None)
    };

    let price = resolve_price(market, MarketType::Futures, signal).await?;

    let quantity = match (signal.sizing, closing) {
        (Sizing::Quantity(q), _) => q,
        (Sizing::Percentage(p), true) => share(available, p)?,
        (Sizing::Percentage(p), false) => {
            divide(multiply(share(available, p)?, leverage)?, price)?
        }
        (Sizing::UsdtAmount(amount), true) => divide(amount, price)?,
        (Sizing::UsdtAmount(amount), false) => divide(multiply(amount, leverage)?, price)?,
    };

    let mut capped = None;
    let quantity = if closing && quantity > available {
        capped = Some(format!(
            "Quantity capped at the open position size {}.",
            available.normalize()
        ));
        available
    } else {
        quantity
    };

    let filters = info.filters(MarketType::Futures);
    let mut sized = apply_step(quantity, &filters);
    if sized.quantity.is_zero() {
        return Err(unsizable());
    }
    if let Some(cap) = capped {
        sized.adjustment = Some(match sized.adjustment {
            Some(step) => format!("{cap}\n{step}"),
            None => cap,
        });
    }

    let mut errors = Vec::new();
    check_lot_size(&mut errors, sized.quantity, &filters, base);

    if let Some(position) = open_position {
        tracing::debug!(symbol, %position, quantity = %sized.quantity, "closing position");
    } else {
        if filters.has_price_filter {
            let rounded = round_to_tick(price, filters.tick_size);
            let below = filters.min_price > Decimal::ZERO && rounded < filters.min_price;
            let above = filters.max_price > Decimal::ZERO && rounded > filters.max_price;
            if below || above {
                errors.push(format!(
                    "Price {} is outside the allowed range ({} - {})",
                    rounded.normalize(),
                    filters.min_price.normalize(),
                    filters.max_price.normalize()
                ));
            }
        }

        let notional = multiply(sized.quantity, price)?;
        if filters.min_notional > Decimal::ZERO && notional < filters.min_notional {
            errors.push(format!(
                "Order value {notional:.2} {quote} is below the minimum of {:.2} {quote}",
                filters.min_notional
            ));
        }

        let required_margin = divide(notional, leverage)?;
        if available < required_margin {
            errors.push(format!(
                "Insufficient margin to open x{} position: {required_margin:.2} {quote} required, {available:.2} {quote} available",
                signal.leverage
            ));
        }

        if errors.is_empty()
            && let Err(e) = market.set_leverage(symbol, signal.leverage).await
        {
            tracing::warn!(symbol, leverage = signal.leverage, error = %e, "could not set leverage");
        }
    }

    if !errors.is_empty() {
        return Err(Rejection { errors });
    }

    let summary = format!(
        "{}FUTURES: {} {} {symbol} x{} at {} {quote}",
        sized
            .adjustment
            .as_deref()
            .map(|a| format!("{a}\n"))
            .unwrap_or_default(),
        signal.action.as_str().to_uppercase(),
        sized.text,
        signal.leverage,
        price.normalize()
    );
    Ok(ValidatedOrder {
        symbol: signal.symbol.clone(),
        action: signal.action,
        market: MarketType::Futures,
        side: signal.action.side(closing),
        quantity: sized.quantity,
        quantity_text: sized.text,
        price,
        leverage: Some(signal.leverage),
        reduce_only: closing,
        adjustment: sized.adjustment,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeError;
    use rust_decimal::dec;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeMarket {
        spot: HashMap<String, Decimal>,
        futures: HashMap<String, Decimal>,
        price: Decimal,
        position: Option<Decimal>,
        leverage_calls: Mutex<Vec<u32>>,
    }

    fn symbol(min_notional_filter: serde_json::Value) -> SymbolInfo {
        serde_json::from_value(json!({
            "symbol": "BTCUSDT",
            "status": "TRADING",
            "baseAsset": "BTC",
            "quoteAsset": "USDT",
            "filters": [
                {"filterType": "PRICE_FILTER", "minPrice": "0.10", "maxPrice": "1000000", "tickSize": "0.10"},
                {"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "1000", "stepSize": "0.001"},
                min_notional_filter
            ]
        }))
        .unwrap()
    }

    #[async_trait]
    impl MarketData for FakeMarket {
        async fn spot_balances(&self) -> ExchangeResult<HashMap<String, Decimal>> {
            Ok(self.spot.clone())
        }

        async fn futures_balances(&self) -> ExchangeResult<HashMap<String, Decimal>> {
            Ok(self.futures.clone())
        }

        async fn symbol_info(
            &self,
            market: MarketType,
            symbol_name: &str,
        ) -> ExchangeResult<Option<SymbolInfo>> {
            if symbol_name != "BTCUSDT" {
                return Ok(None);
            }
            Ok(Some(match market {
                MarketType::Spot => symbol(json!({"filterType": "NOTIONAL", "minNotional": "5"})),
                MarketType::Futures => {
                    symbol(json!({"filterType": "MIN_NOTIONAL", "notional": "100"}))
                }
            }))
        }

        async fn price(&self, _market: MarketType, _symbol: &str) -> ExchangeResult<Decimal> {
            if self.price.is_zero() {
                return Err(ExchangeError::Decode("no ticker".into()));
            }
            Ok(self.price)
        }

        async fn position_amount(&self, _symbol: &str) -> ExchangeResult<Option<Decimal>> {
            Ok(self.position)
        }

        async fn set_leverage(&self, _symbol: &str, leverage: u32) -> ExchangeResult<()> {
            self.leverage_calls.lock().unwrap().push(leverage);
            Ok(())
        }
    }

    fn market() -> FakeMarket {
        FakeMarket {
            spot: HashMap::from([("USDT".into(), dec!(1000)), ("BTC".into(), dec!(0.5))]),
            futures: HashMap::from([("USDT".into(), dec!(500))]),
            price: dec!(50000),
            ..Default::default()
        }
    }

    fn signal(action: Action, sizing: Sizing) -> Signal {
        Signal {
            symbol: "BTCUSDT".into(),
            action,
            sizing,
            price: None,
            leverage: 1,
            close_position: false,
        }
    }

    fn request(value: serde_json::Value) -> SignalRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn field_checks_require_symbol_action_and_one_sizing() {
        let err = request(json!({"percentage": 10})).into_signal().unwrap_err();
        assert_eq!(err.errors, vec!["Missing fields: symbol, action"]);

        let err = request(json!({"symbol": "btcusdt", "action": "hold", "qty": 1}))
            .into_signal()
            .unwrap_err();
        assert!(err.errors[0].starts_with("Invalid action 'hold'"));

        let err = request(json!({"symbol": "BTCUSDT", "action": "buy"}))
            .into_signal()
            .unwrap_err();
        assert!(err.errors[0].contains("is required"));

        let err = request(json!({"symbol": "BTCUSDT", "action": "buy", "quantity": 1, "usdt_amount": 5}))
            .into_signal()
            .unwrap_err();
        assert!(err.errors[0].starts_with("Only one"));

        let err = request(json!({"symbol": "BTCUSDT", "action": "buy", "percentage": 150}))
            .into_signal()
            .unwrap_err();
        assert!(err.errors[0].starts_with("percentage"));
    }

    #[test]
    fn valid_request_becomes_a_signal() {
        let signal = request(json!({
            "symbol": " btcusdt ", "action": "Long", "usdt_amount": "25.5",
            "leverage": 5, "close_position": false
        }))
        .into_signal()
        .unwrap();
        assert_eq!(signal.symbol, "BTCUSDT");
        assert_eq!(signal.action, Action::Long);
        assert_eq!(signal.sizing, Sizing::UsdtAmount(dec!(25.5)));
        assert_eq!(signal.leverage, 5);

        let spot = request(json!({"symbol": "BTCUSDT", "action": "buy", "qty": 1, "leverage": 10, "close_position": true}))
            .into_signal()
            .unwrap();
        assert_eq!(spot.leverage, 1);
        assert!(!spot.close_position);
    }

    #[test]
    fn sides_follow_action_and_closing() {
        assert_eq!(Action::Long.side(false), OrderSide::Buy);
        assert_eq!(Action::Short.side(false), OrderSide::Sell);
        assert_eq!(Action::Long.side(true), OrderSide::Sell);
        assert_eq!(Action::Short.side(true), OrderSide::Buy);
        assert_eq!(Action::for_market(true, MarketType::Futures), Action::Long);
        assert_eq!(Action::for_market(false, MarketType::Spot), Action::Sell);
    }

    #[test]
    fn truncation_floors_to_step_precision() {
        assert_eq!(truncate_to_step(dec!(0.0019), dec!(0.001)).to_string(), "0.001");
        assert_eq!(truncate_to_step(dec!(2), dec!(0.010)).to_string(), "2.00");
        assert_eq!(truncate_to_step(dec!(7.9), dec!(1)).to_string(), "7");
        assert_eq!(truncate_to_step(dec!(1.23456), Decimal::ZERO), dec!(1.23456));
    }

    #[tokio::test]
    async fn spot_buy_by_percentage_is_truncated() {
        let market = market();
        let order = validate(&market, &signal(Action::Buy, Sizing::Percentage(dec!(10))))
            .await
            .unwrap();
        // 10% of 1000 USDT at 50000 = 0.002 BTC.
        assert_eq!(order.quantity_text, "0.002");
        assert_eq!(order.side, OrderSide::Buy);
        assert!(order.adjustment.is_none());
        assert!(order.summary.starts_with("SPOT: BUY 0.002 BTC"));
    }

    #[tokio::test]
    async fn spot_adjustment_is_reported() {
        let market = market();
        let order = validate(&market, &signal(Action::Buy, Sizing::UsdtAmount(dec!(120))))
            .await
            .unwrap();
        assert_eq!(order.quantity_text, "0.002");
        assert!(order.adjustment.unwrap().starts_with("Quantity adjusted from 0.0024"));
    }

    #[tokio::test]
    async fn spot_rejects_insufficient_funds_and_zero_quantity() {
        let market = market();
        let err = validate(&market, &signal(Action::Sell, Sizing::Quantity(dec!(2))))
            .await
            .unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("Insufficient funds in BTC")));

        let err = validate(&market, &signal(Action::Buy, Sizing::Quantity(dec!(0.0001))))
            .await
            .unwrap_err();
        assert_eq!(err.errors, vec!["Could not determine the quantity to trade."]);
    }

    #[tokio::test]
    async fn spot_checks_min_notional_with_signal_price() {
        let market = market();
        let mut s = signal(Action::Buy, Sizing::Quantity(dec!(0.001)));
        s.price = Some(dec!(1000));
        let err = validate(&market, &s).await.unwrap_err();
        assert_eq!(
            err.errors,
            vec!["Order value 1.00 USDT is below the minimum of 5.00 USDT"]
        );
    }

    #[tokio::test]
    async fn spot_requires_a_funded_asset_and_known_symbol() {
        let mut market = market();
        market.spot.remove("USDT");
        let err = validate(&market, &signal(Action::Buy, Sizing::Percentage(dec!(50))))
            .await
            .unwrap_err();
        assert_eq!(err.errors, vec!["Insufficient funds in USDT"]);

        let mut unknown = signal(Action::Sell, Sizing::Percentage(dec!(50)));
        unknown.symbol = "DOGEBTC".into();
        let err = validate(&market, &unknown).await.unwrap_err();
        assert_eq!(err.errors, vec!["Symbol 'DOGEBTC' does not exist on spot"]);
    }

    #[tokio::test]
    async fn futures_open_uses_leverage_and_sets_it() {
        let market = market();
        let mut s = signal(Action::Long, Sizing::UsdtAmount(dec!(100)));
        s.leverage = 5;
        let order = validate(&market, &s).await.unwrap();
        // 100 USDT x5 / 50000 = 0.01 BTC, notional 500, margin 100.
        assert_eq!(order.quantity_text, "0.010");
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.leverage, Some(5));
        assert!(!order.reduce_only);
        assert_eq!(*market.leverage_calls.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn oversized_amounts_are_rejected_not_overflowed() {
        let market = market();
        let huge = Decimal::try_from(2e28_f64).unwrap();

        let mut long = signal(Action::Long, Sizing::UsdtAmount(huge));
        long.leverage = 5;
        let err = validate(&market, &long).await.unwrap_err();
        assert_eq!(err.errors, vec!["Could not determine the quantity to trade."]);
        assert!(market.leverage_calls.lock().unwrap().is_empty());

        let mut by_quantity = signal(Action::Short, Sizing::Quantity(huge));
        by_quantity.leverage = 125;
        let err = validate(&market, &by_quantity).await.unwrap_err();
        assert_eq!(err.errors, vec!["Could not determine the quantity to trade."]);

        let err = validate(&market, &signal(Action::Buy, Sizing::Quantity(huge)))
            .await
            .unwrap_err();
        assert_eq!(err.errors, vec!["Could not determine the quantity to trade."]);
    }

    #[tokio::test]
    async fn futures_open_checks_notional_and_margin() {
        let market = market();
        let err = validate(&market, &signal(Action::Short, Sizing::UsdtAmount(dec!(50))))
            .await
            .unwrap_err();
        assert!(err.errors[0].starts_with("Order value 50.00 USDT is below the minimum of 100.00"));

        let err = validate(&market, &signal(Action::Short, Sizing::Quantity(dec!(1))))
            .await
            .unwrap_err();
        assert!(err.errors.iter().any(|e| e.starts_with("Insufficient margin")));
        assert!(market.leverage_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn futures_close_requires_and_caps_to_position() {
        let mut market = market();
        let mut s = signal(Action::Long, Sizing::Quantity(dec!(0.5)));
        s.close_position = true;

        let err = validate(&market, &s).await.unwrap_err();
        assert_eq!(err.errors, vec!["No open position to close in BTCUSDT"]);

        market.position = Some(dec!(0.2));
        let order = validate(&market, &s).await.unwrap();
        assert_eq!(order.quantity, dec!(0.2));
        assert_eq!(order.side, OrderSide::Sell);
        assert!(order.reduce_only);
        assert!(order.adjustment.unwrap().starts_with("Quantity capped"));

        market.position = Some(dec!(-0.3));
        let mut short = signal(Action::Short, Sizing::Percentage(dec!(50)));
        short.close_position = true;
        let order = validate(&market, &short).await.unwrap();
        assert_eq!(order.quantity_text, "0.150");
        assert_eq!(order.side, OrderSide::Buy);
    }

    #[tokio::test]
    async fn missing_price_is_a_rejection() {
        let mut market = market();
        market.price = Decimal::ZERO;
        let err = validate(&market, &signal(Action::Buy, Sizing::Percentage(dec!(10))))
            .await
            .unwrap_err();
        assert_eq!(err.errors, vec!["Could not get the price for 'BTCUSDT' on SPOT"]);
    }
}
