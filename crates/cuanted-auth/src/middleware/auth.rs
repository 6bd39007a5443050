//! Request identity resolution.
//!
//! A bearer ID token takes precedence over the session cookie. Any
//! verification failure leaves the request unauthenticated; handlers that
//! require a user take [`AuthUser`], which rejects with
//! `401 {"error":"Not authenticated"}`.
//!
//! ```ignore
//! async fn list_exchanges(user: AuthUser, State(state): State<AppState>) -> ApiResult<Json<Value>> {
//!     let rows = ExchangeStorage::new(&state.pool).list(&user.uid).await?;
//!     ...
//! }
//! ```

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;

use crate::config::SessionCookieConfig;
use crate::error::AuthError;
use crate::firebase::FirebaseAuth;
use crate::supabase::SupabaseAuth;

/// State required by the identity extractors.
///
/// Include it in the application state and expose it via `FromRef`.
#[derive(Clone)]
pub struct AuthState {
    pub firebase: Arc<FirebaseAuth>,
    pub supabase: Option<Arc<SupabaseAuth>>,
    pub cookie: SessionCookieConfig,
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
}

/// `Authorization: Bearer <token>`, if present and non-empty.
pub fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

/// The (percent-decoded) session cookie value, if present.
pub fn session_token(parts: &Parts, config: &SessionCookieConfig) -> Option<String> {
    CookieJar::from_headers(&parts.headers)
        .get(&config.name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolves the caller, or `None` if no credential verifies.
pub async fn resolve_user(parts: &Parts, state: &AuthState) -> Option<AuthUser> {
    if let Some(token) = bearer_token(parts) {
        return match state.firebase.verify_id_token(&token).await {
            Ok(claims) => Some(AuthUser {
                uid: claims.sub,
                email: claims.email,
            }),
            Err(e) => {
                tracing::debug!(error = %e, "bearer token rejected by Firebase");
                resolve_supabase(state, &token).await
            }
        };
    }

    let cookie = session_token(parts, &state.cookie)?;
    match state.firebase.verify_session_cookie(&cookie, true).await {
        Ok(claims) => Some(AuthUser {
            uid: claims.sub,
            email: claims.email,
        }),
        Err(e) => {
            tracing::debug!(error = %e, "session cookie rejected");
            None
        }
    }
}

async fn resolve_supabase(state: &AuthState, token: &str) -> Option<AuthUser> {
    let supabase = state.supabase.as_ref()?;
    match supabase.get_user(token).await {
        Ok(Some(user)) => Some(AuthUser {
            uid: user.id,
            email: user.email,
        }),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Supabase user lookup failed");
            None
        }
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        resolve_user(parts, &auth_state)
            .await
            .ok_or(AuthError::Unauthenticated)
    }
}

/// Optional identity; never rejects.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        Ok(MaybeAuthUser(resolve_user(parts, &auth_state).await))
    }
}
