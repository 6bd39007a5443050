//! TradingView alert webhook.
//!
//! An alert names a user and one of their strategies. The strategy supplies
//! the exchange, pair, market and sizing; the alert only says which way to
//! trade and whether to close. Every processed signal lands in
//! `operaciones`, whatever the outcome.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router, middleware};
use cuanted_db_postgres::{
    ExchangeStorage, NewOperation, OperationStatus, OperationStorage, StrategyRow, StrategyStorage,
};
use cuanted_exchange::{
    Action, BinanceClient, MarketType, SignalRequest, ValidatedOrder, validate,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::metrics;
use crate::middleware::security_headers;
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/webhook", post(receive).options(preflight))
        .layer(middleware::from_fn(security_headers))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Success,
    Error,
    Warning,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Error => "error",
            Status::Warning => "warning",
        }
    }
}

/// `{status, message, log_summary}` body every webhook answer uses.
#[derive(Debug)]
struct WebhookReply {
    code: StatusCode,
    status: Status,
    message: String,
    log_summary: String,
}

impl WebhookReply {
    fn new(code: StatusCode, status: Status, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code,
            status,
            log_summary: message.clone(),
            message,
        }
    }

    fn error(code: StatusCode, message: impl Into<String>) -> Self {
        Self::new(code, Status::Error, message)
    }

    fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.log_summary = summary.into();
        self
    }
}

impl IntoResponse for WebhookReply {
    fn into_response(self) -> Response {
        let body = json!({
            "status": self.status.as_str(),
            "message": self.message,
            "log_summary": self.log_summary,
        });
        (self.code, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct Alert {
    user_id: Option<String>,
    strategy_id: Option<String>,
    action: Option<String>,
    market_position: Option<String>,
    #[serde(default)]
    close_position: bool,
}

impl Alert {
    /// `market_position: flat` is how TradingView reports an exit.
    fn is_close(&self) -> bool {
        self.close_position
            || self
                .market_position
                .as_deref()
                .is_some_and(|p| p.trim().eq_ignore_ascii_case("flat"))
    }

    /// `true` for buy, `false` for sell.
    fn direction(&self) -> Option<bool> {
        match self.action.as_deref()?.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(true),
            "sell" => Some(false),
            _ => None,
        }
    }
}

async fn preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("POST, OPTIONS"),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type"),
            ),
        ],
    )
}

async fn receive(State(state): State<AppState>, body: Bytes) -> WebhookReply {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return WebhookReply::error(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {e}"));
        }
    };
    tracing::info!(payload = %payload, "TradingView webhook received");

    let alert: Alert = match serde_json::from_value(payload.clone()) {
        Ok(alert) => alert,
        Err(e) => {
            return WebhookReply::error(StatusCode::BAD_REQUEST, format!("Invalid alert: {e}"));
        }
    };

    match process(&state, &alert, &payload).await {
        Ok(reply) | Err(reply) => reply,
    }
}

/// Runs an alert through strategy lookup, validation and execution.
/// `Err` carries replies that stop before an order is attempted.
async fn process(
    state: &AppState,
    alert: &Alert,
    payload: &Value,
) -> Result<WebhookReply, WebhookReply> {
    let (Some(user_id), Some(strategy_id)) = (
        alert.user_id.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        alert.strategy_id.as_deref().map(str::trim).filter(|s| !s.is_empty()),
    ) else {
        return Err(WebhookReply::error(
            StatusCode::BAD_REQUEST,
            "Missing user_id or strategy_id",
        ));
    };
    let strategy_id = Uuid::parse_str(strategy_id)
        .map_err(|_| WebhookReply::error(StatusCode::BAD_REQUEST, "Invalid strategy_id"))?;

    let strategy = StrategyStorage::new(&state.pool)
        .find(user_id, strategy_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, %strategy_id, "failed to load strategy");
            internal_error()
        })?
        .ok_or_else(|| WebhookReply::error(StatusCode::NOT_FOUND, "Strategy not found"))?;

    if !strategy.is_active {
        tracing::info!(%strategy_id, "signal for inactive strategy ignored");
        return Err(WebhookReply::new(
            StatusCode::FORBIDDEN,
            Status::Warning,
            format!("Strategy '{}' is inactive; signal ignored", strategy.name),
        ));
    }

    let market: MarketType = strategy
        .market_type
        .as_deref()
        .unwrap_or("spot")
        .parse()
        .map_err(|e: String| WebhookReply::error(StatusCode::BAD_REQUEST, e))?;
    let buy = alert.direction().ok_or_else(|| {
        WebhookReply::error(
            StatusCode::BAD_REQUEST,
            "Invalid action. Allowed actions: buy, sell",
        )
    })?;
    let action = Action::for_market(buy, market);

    let exchange_name = strategy
        .exchange_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| {
            WebhookReply::error(StatusCode::BAD_REQUEST, "Strategy has no exchange configured")
        })?;
    let exchange = ExchangeStorage::new(&state.pool)
        .find_by_name(user_id, exchange_name)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, exchange_name, "failed to load exchange credentials");
            internal_error()
        })?
        .ok_or_else(|| {
            WebhookReply::error(
                StatusCode::NOT_FOUND,
                format!("No credentials saved for exchange '{exchange_name}'"),
            )
        })?;
    let (api_key, api_secret) = exchange.credentials().ok_or_else(|| {
        WebhookReply::error(
            StatusCode::BAD_REQUEST,
            "Exchange API key or secret is empty",
        )
    })?;

    let mut audit = Audit::new(user_id, &strategy, action, market, payload);
    let request = signal_request(&strategy, action, alert.is_close());
    audit.symbol = request.symbol.clone().unwrap_or_default();

    let signal = match request.into_signal() {
        Ok(signal) => signal,
        Err(rejection) => {
            audit.finish(state, OperationStatus::Rejected, rejection.message(), None).await;
            return Err(WebhookReply::error(StatusCode::BAD_REQUEST, rejection.message()));
        }
    };

    let client = BinanceClient::new(
        state.http.clone(),
        &state.config.binance,
        exchange.testnet,
        api_key,
        api_secret,
    );
    let order = match validate(&client, &signal).await {
        Ok(order) => order,
        Err(rejection) => {
            audit.finish(state, OperationStatus::Rejected, rejection.message(), None).await;
            return Err(WebhookReply::error(StatusCode::BAD_REQUEST, rejection.message())
                .with_summary(format!("Validation failed: {}", rejection.errors.join("; "))));
        }
    };
    audit.side = Some(order.side.as_str().to_string());
    audit.quantity = Some(order.quantity_text.clone());

    let placed = match order.market {
        MarketType::Spot => {
            client
                .market_order(&order.symbol, order.side, &order.quantity_text)
                .await
        }
        MarketType::Futures => {
            client
                .futures_market_order(
                    &order.symbol,
                    order.side,
                    &order.quantity_text,
                    order.reduce_only,
                )
                .await
        }
    };

    match placed {
        Ok(response) => {
            let order_id = exchange_order_id(&response);
            audit
                .finish(state, OperationStatus::Executed, order.summary.clone(), order_id)
                .await;
            Ok(success(&order, &response))
        }
        Err(e) => {
            let message = format!(
                "Error placing {} order: {}",
                order.market.as_str().to_uppercase(),
                e.user_message()
            );
            tracing::error!(error = %e, symbol = %order.symbol, "order placement failed");
            audit.finish(state, OperationStatus::Failed, message.clone(), None).await;
            Ok(WebhookReply::error(StatusCode::INTERNAL_SERVER_ERROR, message)
                .with_summary("Webhook execution failed"))
        }
    }
}

fn internal_error() -> WebhookReply {
    WebhookReply::error(StatusCode::INTERNAL_SERVER_ERROR, "Internal webhook error")
}

/// Assembles the signal from the strategy's stored settings.
fn signal_request(strategy: &StrategyRow, action: Action, close: bool) -> SignalRequest {
    let risk_value = strategy.risk_value.and_then(|v| Decimal::try_from(v).ok());
    let (percentage, usdt_amount) = match strategy.risk_type.as_deref().map(str::trim) {
        Some("percentage") => (risk_value, None),
        Some("fixed_amount") => (None, risk_value),
        _ => (None, None),
    };
    SignalRequest {
        symbol: strategy.trading_pair.as_deref().map(|p| p.replace('/', "")),
        action: Some(action.as_str().to_string()),
        percentage,
        usdt_amount,
        leverage: strategy.leverage.and_then(|l| u32::try_from(l).ok()),
        close_position: close,
        ..SignalRequest::default()
    }
}

/// Binance answers `orderId` as a number.
fn exchange_order_id(response: &Value) -> Option<String> {
    match response.get("orderId")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn success(order: &ValidatedOrder, response: &Value) -> WebhookReply {
    let mut message = format!(
        "{} order executed: {}",
        order.action.as_str().to_uppercase(),
        order.summary
    );
    if let Some(adjustment) = &order.adjustment {
        message.push_str(&format!(" ({adjustment})"));
    }
    WebhookReply::new(StatusCode::OK, Status::Success, message).with_summary(format!(
        "Order executed: action={}, symbol={}, quantity={}. {response}",
        order.action, order.symbol, order.quantity_text
    ))
}

/// The `operaciones` row written for a signal.
struct Audit<'a> {
    user_id: &'a str,
    strategy_id: Uuid,
    symbol: String,
    action: Action,
    market: MarketType,
    side: Option<String>,
    quantity: Option<String>,
    payload: &'a Value,
}

impl<'a> Audit<'a> {
    fn new(
        user_id: &'a str,
        strategy: &StrategyRow,
        action: Action,
        market: MarketType,
        payload: &'a Value,
    ) -> Self {
        Self {
            user_id,
            strategy_id: strategy.id,
            symbol: String::new(),
            action,
            market,
            side: None,
            quantity: None,
            payload,
        }
    }

    /// Writes the row. A failed write is logged, never surfaced.
    async fn finish(
        self,
        state: &AppState,
        status: OperationStatus,
        message: String,
        exchange_order_id: Option<String>,
    ) {
        metrics::record_webhook_order(self.market.as_str(), status.as_str());
        let op = NewOperation {
            user_id: self.user_id.to_string(),
            strategy_id: Some(self.strategy_id),
            symbol: self.symbol,
            action: self.action.as_str().to_string(),
            side: self.side,
            market_type: self.market.as_str().to_string(),
            quantity: self.quantity,
            status,
            exchange_order_id,
            message: Some(message),
            payload: self.payload.clone(),
        };
        if let Err(e) = OperationStorage::new(&state.pool).record(&op).await {
            tracing::error!(error = %e, strategy_id = ?op.strategy_id, "failed to record operation");
        }
    }
}
