//! Saved exchange credentials, trading pairs and connection tests.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cuanted_api::{ApiError, ApiResult};
use cuanted_auth::AuthUser;
use cuanted_db_postgres::{ExchangeStorage, NewExchange, UpdateSet, exchange};
use cuanted_exchange::{
    BinanceClient, ExchangeError, MarketType, describe_connection_error, is_supported,
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{JsonBody, QueryParams, id_field, parse_id};
use crate::metrics;
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/exchanges",
            get(list)
                .post(create)
                .patch(update)
                .delete(delete),
        )
        .route(
            "/api/profile/exchanges",
            get(list)
                .post(create)
                .patch(update)
                .delete(delete),
        )
        .route("/api/exchanges/{exchange}/pairs", get(pairs))
        .route("/api/test-connection", post(test_connection))
}

async fn list(user: AuthUser, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let exchanges: Vec<_> = ExchangeStorage::new(&state.pool)
        .list(&user.uid)
        .await?
        .into_iter()
        .map(|row| row.masked())
        .collect();
    Ok(Json(json!({ "exchanges": exchanges })))
}

async fn create(
    user: AuthUser,
    State(state): State<AppState>,
    JsonBody(mut body): JsonBody<NewExchange>,
) -> ApiResult<impl IntoResponse> {
    body.exchange_name = body.exchange_name.trim().to_string();
    if body.exchange_name.is_empty() {
        return Err(ApiError::bad_request("Missing exchange_name"));
    }
    body.api_key = body.api_key.filter(|k| !k.trim().is_empty());
    body.api_secret = body.api_secret.filter(|s| !s.trim().is_empty());

    let row = ExchangeStorage::new(&state.pool)
        .create(&user.uid, &body)
        .await?;
    tracing::info!(uid = %user.uid, exchange = %row.exchange_name, "exchange saved");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "exchange": row.masked() })),
    ))
}

async fn update(
    user: AuthUser,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> ApiResult<Json<Value>> {
    let id = id_field(&body)?;
    let mut updates = body
        .as_object()
        .cloned()
        .ok_or_else(|| ApiError::bad_request("Expected a JSON object"))?;
    updates.remove("id");
    let set = UpdateSet::from_json(&updates, exchange::UPDATABLE)?;

    let row = ExchangeStorage::new(&state.pool)
        .update(&user.uid, id, &set)
        .await?;
    Ok(Json(json!({ "exchange": row.map(|r| r.masked()) })))
}

#[derive(Debug, Deserialize)]
struct IdQuery {
    id: Option<String>,
}

async fn delete(
    user: AuthUser,
    State(state): State<AppState>,
    QueryParams(query): QueryParams<IdQuery>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(query.id.as_deref())?;
    ExchangeStorage::new(&state.pool)
        .delete(&user.uid, id)
        .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairsQuery {
    market_type: Option<String>,
}

const PAIRS_CACHE: &str = "trading_pairs";

/// `TRADING` pairs of an exchange, cached per (exchange, market).
async fn pairs(
    State(state): State<AppState>,
    Path(exchange_name): Path<String>,
    QueryParams(query): QueryParams<PairsQuery>,
) -> ApiResult<Json<Value>> {
    if !is_supported(&exchange_name) {
        return Err(ApiError::bad_request("Exchange not supported"));
    }
    let market: MarketType = query
        .market_type
        .as_deref()
        .unwrap_or("spot")
        .parse()
        .map_err(ApiError::bad_request)?;

    let key = (exchange_name.to_ascii_lowercase(), market);
    if let Some(pairs) = state.pairs_cache.get(&key).await {
        metrics::record_cache_hit(PAIRS_CACHE);
        return Ok(Json(json!({ "pairs": *pairs, "count": pairs.len() })));
    }
    metrics::record_cache_miss(PAIRS_CACHE);

    let client = BinanceClient::public(state.http.clone(), &state.config.binance, false);
    let pairs = client.trading_pairs(market).await.map_err(|e| {
        tracing::error!(error = %e, %market, "failed to fetch trading pairs");
        ApiError::bad_gateway("Failed to fetch trading pairs", Some(e.to_string()))
    })?;
    let pairs = Arc::new(pairs);
    state.pairs_cache.insert(key, pairs.clone()).await;
    tracing::debug!(%market, count = pairs.len(), "trading pairs cached");

    Ok(Json(json!({ "pairs": *pairs, "count": pairs.len() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionTest {
    exchange: Option<String>,
    api_key: Option<String>,
    api_secret: Option<String>,
    #[serde(default)]
    testnet: bool,
}

fn connection_failure(status: StatusCode, body: Value) -> Response {
    let mut body = body;
    body["success"] = json!(false);
    (status, Json(body)).into_response()
}

/// Checks credentials by reading the spot account.
async fn test_connection(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ConnectionTest>,
) -> Response {
    let (Some(api_key), Some(api_secret)) = (
        body.api_key.as_deref().filter(|k| !k.is_empty()),
        body.api_secret.as_deref().filter(|s| !s.is_empty()),
    ) else {
        return connection_failure(
            StatusCode::BAD_REQUEST,
            json!({ "error": "API key and secret are required" }),
        );
    };
    if !body.exchange.as_deref().is_some_and(is_supported) {
        return connection_failure(
            StatusCode::BAD_REQUEST,
            json!({ "error": "Only Binance is currently supported" }),
        );
    }

    let client = BinanceClient::new(
        state.http.clone(),
        &state.config.binance,
        body.testnet,
        api_key,
        api_secret,
    );
    match client.account().await {
        Ok(account) => {
            tracing::info!(testnet = body.testnet, "Binance connection test succeeded");
            Json(json!({
                "success": true,
                "message": "Connection successful",
                "accountType": account.account_type,
                "canTrade": account.can_trade,
                "canDeposit": account.can_deposit,
                "canWithdraw": account.can_withdraw,
            }))
            .into_response()
        }
        Err(ExchangeError::Api { code, msg, .. }) => {
            tracing::warn!(code, %msg, "Binance rejected connection test");
            let failure = describe_connection_error(Some(code), &msg);
            connection_failure(StatusCode::BAD_REQUEST, json!(failure))
        }
        Err(e) => {
            tracing::error!(error = %e, "connection test failed");
            connection_failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Connection test failed. Check your credentials." }),
            )
        }
    }
}
