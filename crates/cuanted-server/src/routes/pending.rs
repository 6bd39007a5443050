//! Strategies drafted before sign-up. Unauthenticated; keyed by email.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use cuanted_api::{ApiError, ApiResult};
use cuanted_db_postgres::PendingStrategyStorage;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{JsonBody, QueryParams};
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/pending-strategies",
        get(latest).post(save).delete(remove),
    )
}

#[derive(Debug, Deserialize)]
struct EmailQuery {
    email: Option<String>,
}

fn required_email(email: Option<&str>) -> ApiResult<&str> {
    email
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing email"))
}

async fn latest(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<EmailQuery>,
) -> ApiResult<Json<Value>> {
    let email = required_email(query.email.as_deref())?;
    let pending = PendingStrategyStorage::new(&state.pool).latest(email).await?;
    Ok(Json(json!({ "pending": pending })))
}

#[derive(Debug, Deserialize)]
struct PendingBody {
    email: Option<String>,
    strategy_data: Option<Value>,
}

async fn save(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<PendingBody>,
) -> ApiResult<Json<Value>> {
    let (Ok(email), Some(data)) = (
        required_email(body.email.as_deref()),
        body.strategy_data.filter(|d| !d.is_null()),
    ) else {
        return Err(ApiError::bad_request("Missing data"));
    };
    PendingStrategyStorage::new(&state.pool)
        .upsert(email, &data)
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn remove(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<EmailQuery>,
) -> ApiResult<Json<Value>> {
    let email = required_email(query.email.as_deref())?;
    PendingStrategyStorage::new(&state.pool).delete(email).await?;
    Ok(Json(json!({ "success": true })))
}
