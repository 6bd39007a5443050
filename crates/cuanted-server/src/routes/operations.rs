use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use cuanted_api::ApiResult;
use cuanted_auth::AuthUser;
use cuanted_db_postgres::OperationStorage;
use serde_json::{Value, json};

use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/operaciones", get(list))
}

/// The caller's signal audit log, newest first.
async fn list(user: AuthUser, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let operations = OperationStorage::new(&state.pool).list(&user.uid).await?;
    Ok(Json(json!({ "operaciones": operations })))
}
