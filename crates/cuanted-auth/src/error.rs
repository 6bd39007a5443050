//! Authentication errors.

use axum::response::{IntoResponse, Response};
use cuanted_api::ApiError;

use crate::keys::KeyError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("User disabled")]
    UserDisabled,

    #[error("Signing keys unavailable: {0}")]
    Keys(#[from] KeyError),

    /// The identity provider answered with an error body.
    #[error("Identity provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A credential or setting needed for this call is missing.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// The service account key could not be used.
    #[error("Credential error: {0}")]
    Credential(String),
}

impl AuthError {
    /// `true` when the caller's credential was rejected, as opposed to the
    /// provider being unreachable or misconfigured.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::Unauthenticated
                | AuthError::InvalidToken(_)
                | AuthError::TokenExpired
                | AuthError::TokenRevoked
                | AuthError::UserDisabled
        )
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err.is_rejection() {
            ApiError::not_authenticated()
        } else {
            tracing::error!(error = %err, "authentication backend failure");
            ApiError::internal("Authentication service unavailable")
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
