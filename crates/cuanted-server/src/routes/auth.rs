//! Session cookie and sign-in helper routes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use cuanted_api::{ApiError, ApiResult};
use cuanted_auth::MaybeAuthUser;
use cuanted_auth::cookies::{clear_session_cookie, session_cookie};
use cuanted_db_postgres::ProfileStorage;
use serde_json::{Value, json};

use super::{JsonBody, str_field};
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/auth/session",
            post(create_session).delete(delete_session),
        )
        .route("/api/auth/session-status", get(session_status))
        .route("/api/auth/username-email", post(username_email))
        .route("/api/auth/resend-verification", post(resend_verification))
        .route("/api/auth/check-email", post(check_email))
        .route("/api/check-email", post(check_email))
}

async fn create_session(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(body): JsonBody<Value>,
) -> ApiResult<impl IntoResponse> {
    let id_token =
        str_field(&body, "idToken").ok_or_else(|| ApiError::bad_request("Missing idToken"))?;

    let firebase = &state.auth.firebase;
    if let Err(e) = firebase.verify_id_token(id_token).await {
        return Err(if e.is_rejection() {
            ApiError::not_authenticated()
        } else {
            tracing::error!(error = %e, "failed to verify ID token");
            ApiError::internal("Failed to create session")
        });
    }

    let max_age = state.auth.cookie.max_age;
    let value = firebase
        .create_session_cookie(id_token, max_age)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to create session cookie");
            ApiError::internal("Failed to create session")
        })?;

    let jar = jar.add(session_cookie(&state.auth.cookie, value, max_age));
    Ok((jar, Json(json!({ "ok": true }))))
}

async fn delete_session(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let jar = jar.add(clear_session_cookie(&state.auth.cookie));
    (jar, Json(json!({ "ok": true })))
}

async fn session_status(MaybeAuthUser(user): MaybeAuthUser) -> Json<Value> {
    Json(json!({ "authenticated": user.is_some() }))
}

/// Resolves a username to the account email, for username sign-in.
async fn username_email(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> ApiResult<Json<Value>> {
    let username =
        str_field(&body, "username").ok_or_else(|| ApiError::bad_request("Missing username"))?;

    let uid = ProfileStorage::new(&state.pool)
        .find_id_by_username(username)
        .await?
        .ok_or_else(|| ApiError::not_found("Not found"))?;

    let user = state.auth.firebase.get_user(&uid).await.map_err(|e| {
        tracing::error!(error = %e, uid, "failed to look up user");
        ApiError::internal("Internal server error")
    })?;

    match user.and_then(|u| u.email) {
        Some(email) => Ok(Json(json!({ "email": email }))),
        None => Err(ApiError::not_found("Email not found")),
    }
}

async fn resend_verification(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> ApiResult<Json<Value>> {
    let firebase = &state.auth.firebase;
    if firebase
        .config()
        .api_key
        .as_deref()
        .is_none_or(str::is_empty)
    {
        tracing::error!("auth.firebase.api_key is not configured");
        return Err(ApiError::internal("config"));
    }

    let id_token = str_field(&body, "idToken").ok_or_else(|| ApiError::bad_request("invalid"))?;
    let claims = firebase.verify_id_token(id_token).await.map_err(|e| {
        if e.is_rejection() {
            ApiError::unauthorized("invalid")
        } else {
            tracing::error!(error = %e, "failed to verify ID token");
            ApiError::internal("server")
        }
    })?;

    if claims.email_verified {
        return Ok(Json(json!({ "ok": true, "alreadyVerified": true })));
    }

    let continue_url = format!(
        "{}/registro/confirmado",
        state.config.server.site_url.trim_end_matches('/')
    );
    firebase
        .send_email_verification(id_token, Some(&continue_url))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, uid = claims.sub, "resend verification failed");
            ApiError::bad_gateway("send_failed", None)
        })?;

    Ok(Json(json!({ "ok": true })))
}

/// Whether an account exists for an email. Lookup failures answer `true`
/// so sign-up does not proceed on a guess.
async fn check_email(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Value>,
) -> impl IntoResponse {
    let Some(email) = str_field(&body, "email") else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "exists": false })));
    };

    let exists = match state.auth.firebase.get_user_by_email(email).await {
        Ok(user) => user.is_some(),
        Err(e) => {
            tracing::error!(error = %e, "email lookup failed");
            true
        }
    };
    (StatusCode::OK, Json(json!({ "exists": exists })))
}
