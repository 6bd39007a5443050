use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use cuanted_api::{ApiError, ApiResult};
use cuanted_auth::AuthUser;
use cuanted_billing::{BillingSnapshot, Plan, effective_plan};
use cuanted_db_postgres::{NewProfile, ProfileRow, ProfileStorage, UpdateSet, profile};
use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;

use super::JsonBody;
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/profile",
        get(get_profile).post(save_profile).patch(update_profile),
    )
}

/// Plan in force for a stored profile; users without a row are on `free`.
pub(crate) fn plan_of(profile: Option<&ProfileRow>) -> Plan {
    let snapshot = profile.map(BillingSnapshot::from_profile).unwrap_or_default();
    effective_plan(&snapshot, OffsetDateTime::now_utc())
}

/// Loads the caller's profile and derives the plan in force.
pub(crate) async fn current_plan(state: &AppState, uid: &str) -> ApiResult<Plan> {
    let profile = ProfileStorage::new(&state.pool).find(uid).await?;
    Ok(plan_of(profile.as_ref()))
}

async fn get_profile(user: AuthUser, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let profile = ProfileStorage::new(&state.pool).find(&user.uid).await?;
    let plan = plan_of(profile.as_ref());
    Ok(Json(json!({
        "profile": profile,
        "email": user.email,
        "plan": plan,
        "limits": plan.limits(),
    })))
}

#[derive(Debug, Deserialize)]
struct SaveProfile {
    first_name: Option<String>,
    last_name: Option<String>,
    username: Option<String>,
    /// Accepted for compatibility and ignored.
    plan: Option<Value>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn save_profile(
    user: AuthUser,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<SaveProfile>,
) -> ApiResult<Json<Value>> {
    if body.plan.is_some() {
        tracing::debug!(uid = %user.uid, "ignoring client-supplied plan");
    }

    let profiles = ProfileStorage::new(&state.pool);
    let mut username = non_empty(body.username);
    if username.is_none()
        && let Some(email) = user.email.as_deref()
    {
        username = Some(
            profiles
                .unique_username(&profile::username_base(email))
                .await?,
        );
    }

    let id = profiles
        .upsert(
            &user.uid,
            &NewProfile {
                first_name: non_empty(body.first_name),
                last_name: non_empty(body.last_name),
                username,
            },
        )
        .await?;
    tracing::info!(uid = %user.uid, "profile saved");
    Ok(Json(json!({ "profile": { "id": id } })))
}

async fn update_profile(
    user: AuthUser,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> ApiResult<Json<Value>> {
    let object = body
        .as_object()
        .ok_or_else(|| ApiError::bad_request("Expected a JSON object"))?;
    let set = UpdateSet::from_json(object, profile::UPDATABLE)?;

    let id = ProfileStorage::new(&state.pool)
        .update(&user.uid, &set)
        .await?;
    Ok(Json(json!({ "profile": id.map(|id| json!({ "id": id })) })))
}
