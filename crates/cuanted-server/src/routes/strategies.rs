//! Strategy CRUD plus the dashboard's `/api/profile/strategies/*` helpers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use cuanted_api::{ApiError, ApiResult};
use cuanted_auth::AuthUser;
use cuanted_billing::Plan;
use cuanted_db_postgres::{NewStrategy, StrategyStorage, UpdateSet, strategy};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::profile::current_plan;
use super::{JsonBody, QueryParams, id_field, parse_id, str_field};
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/strategies",
            get(list).post(create).patch(update).delete(delete),
        )
        .route("/api/profile/strategies", get(has_strategies))
        .route("/api/profile/strategies/by-id", post(by_id))
        .route("/api/profile/strategies/update", post(update_nested))
        .route("/api/profile/strategies/unique-name", post(unique_name))
        .route("/api/profile/strategies/check-name", post(check_name))
        .route("/api/profile/strategies/set-active", post(set_active))
}

const ACTIVATION_NOT_ALLOWED: &str = "Your plan does not allow activating strategies";

fn can_activate(plan: Plan) -> bool {
    plan.limits().can_activate_strategies
}

async fn list(user: AuthUser, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let strategies = StrategyStorage::new(&state.pool).list(&user.uid).await?;
    Ok(Json(json!({ "strategies": strategies })))
}

async fn create(
    user: AuthUser,
    State(state): State<AppState>,
    JsonBody(mut body): JsonBody<NewStrategy>,
) -> ApiResult<impl IntoResponse> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("Missing name"));
    }
    body.check()?;
    if body.is_active && !can_activate(current_plan(&state, &user.uid).await?) {
        tracing::info!(uid = %user.uid, "plan cannot activate strategies; saving inactive");
        body.is_active = false;
    }

    let row = StrategyStorage::new(&state.pool)
        .create(&user.uid, &body)
        .await?;
    tracing::info!(uid = %user.uid, strategy_id = %row.id, "strategy created");
    Ok((StatusCode::CREATED, Json(json!({ "strategy": row }))))
}

/// Applies an allowlisted update. `is_active` goes through `set-active`.
async fn apply_update(
    state: &AppState,
    uid: &str,
    id: uuid::Uuid,
    updates: &Map<String, Value>,
) -> ApiResult<Json<Value>> {
    let set = UpdateSet::from_json(updates, strategy::UPDATABLE)?;
    strategy::check_update(&set)?;
    let row = StrategyStorage::new(&state.pool)
        .update(uid, id, &set)
        .await?;
    Ok(Json(json!({ "strategy": row })))
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
    apply_update(&state, &user.uid, id, &updates).await
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
    if StrategyStorage::new(&state.pool)
        .delete(&user.uid, id)
        .await?
    {
        tracing::info!(uid = %user.uid, strategy_id = %id, "strategy deleted");
    }
    Ok(Json(json!({ "success": true })))
}

async fn has_strategies(user: AuthUser, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let has = StrategyStorage::new(&state.pool).has_any(&user.uid).await?;
    Ok(Json(json!({ "hasStrategies": has })))
}

async fn by_id(
    user: AuthUser,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> ApiResult<Json<Value>> {
    let id = id_field(&body)?;
    let row = StrategyStorage::new(&state.pool).find(&user.uid, id).await?;
    Ok(Json(json!({ "strategy": row })))
}

async fn update_nested(
    user: AuthUser,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> ApiResult<Json<Value>> {
    let (Some(id), Some(updates)) = (
        body.get("id").and_then(Value::as_str),
        body.get("updates").and_then(Value::as_object),
    ) else {
        return Err(ApiError::bad_request("Missing data"));
    };
    let id = parse_id(Some(id))?;
    apply_update(&state, &user.uid, id, updates).await
}

async fn unique_name(
    user: AuthUser,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> ApiResult<Json<Value>> {
    let base =
        str_field(&body, "baseName").ok_or_else(|| ApiError::bad_request("Missing baseName"))?;
    let name = StrategyStorage::new(&state.pool)
        .unique_copy_name(&user.uid, base)
        .await?;
    Ok(Json(json!({ "name": name })))
}

async fn check_name(
    user: AuthUser,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> ApiResult<Json<Value>> {
    let name = str_field(&body, "name").ok_or_else(|| ApiError::bad_request("Missing name"))?;
    let exists = StrategyStorage::new(&state.pool)
        .name_exists(&user.uid, name)
        .await?;
    Ok(Json(json!({ "exists": exists })))
}

async fn set_active(
    user: AuthUser,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> ApiResult<Json<Value>> {
    let (Some(id), Some(is_active)) = (
        body.get("id").and_then(Value::as_str),
        body.get("is_active").and_then(Value::as_bool),
    ) else {
        return Err(ApiError::bad_request("Missing data"));
    };
    let id = parse_id(Some(id))?;

    if is_active && !can_activate(current_plan(&state, &user.uid).await?) {
        return Err(ApiError::forbidden(ACTIVATION_NOT_ALLOWED));
    }

    let toggled = StrategyStorage::new(&state.pool)
        .set_active(&user.uid, id, is_active)
        .await?;
    Ok(Json(json!({
        "strategy": toggled.map(|(id, is_active)| json!({ "id": id, "is_active": is_active })),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_paid_and_trial_plans_activate() {
        assert!(!can_activate(Plan::Free));
        assert!(can_activate(Plan::Trial));
        assert!(can_activate(Plan::Pro));
        assert!(can_activate(Plan::Admin));
    }
}
