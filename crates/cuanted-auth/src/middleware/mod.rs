//! Axum integration: request identity resolution.

mod auth;

pub use auth::{AuthState, AuthUser, MaybeAuthUser, bearer_token, resolve_user, session_token};
