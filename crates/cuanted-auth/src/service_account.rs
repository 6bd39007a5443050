//! OAuth access tokens for a Google service account.
//!
//! Admin calls to Identity Toolkit authenticate with a bearer token obtained
//! by exchanging a self-signed RS256 JWT assertion (RFC 7523) at the token
//! endpoint. Tokens are cached until a minute before they expire.

use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::AuthError;

const SCOPES: &str = "https://www.googleapis.com/auth/cloud-platform \
https://www.googleapis.com/auth/firebase \
https://www.googleapis.com/auth/identitytoolkit \
https://www.googleapis.com/auth/userinfo.email";

const ASSERTION_LIFETIME_SECS: i64 = 3600;
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct ServiceAccount {
    http: reqwest::Client,
    client_email: String,
    key: EncodingKey,
    token_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccount {
    pub fn new(
        http: reqwest::Client,
        client_email: impl Into<String>,
        private_key_pem: &str,
        token_url: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| AuthError::Credential(format!("invalid service account key: {e}")))?;
        Ok(Self {
            http,
            client_email: client_email.into(),
            key,
            token_url: token_url.into(),
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Returns a cached access token or fetches a new one.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let assertion = self.assertion(OffsetDateTime::now_utc().unix_timestamp())?;
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), %message, "service account token exchange failed");
            return Err(AuthError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_BUFFER);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        tracing::debug!(expires_in = token.expires_in, "obtained service account token");
        Ok(token.access_token)
    }

    fn assertion(&self, now: i64) -> Result<String, AuthError> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            sub: &self.client_email,
            scope: SCOPES,
            aud: &self.token_url,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| AuthError::Credential(e.to_string()))
    }
}
