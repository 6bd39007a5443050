//! Firebase Authentication.
//!
//! Verifies ID tokens and session cookies locally against Google's published
//! keys and talks to the Identity Toolkit REST API for admin operations:
//! minting session cookies, looking up users and sending verification email.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::config::FirebaseConfig;
use crate::error::AuthError;
use crate::keys::{KeyCacheConfig, KeyError, KeyFormat, PublicKeyCache};
use crate::service_account::ServiceAccount;

/// Claims shared by ID tokens and session cookies.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FirebaseClaims {
    pub sub: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub auth_time: Option<i64>,
    pub iat: Option<i64>,
    pub exp: i64,
}

impl FirebaseClaims {
    pub fn uid(&self) -> &str {
        &self.sub
    }
}

/// Subset of the Identity Toolkit user record.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub local_id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub disabled: bool,
    /// Seconds since epoch before which issued tokens are revoked.
    pub valid_since: Option<String>,
}

impl UserRecord {
    fn valid_since_secs(&self) -> Option<i64> {
        self.valid_since.as_deref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<UserRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionCookieResponse {
    session_cookie: String,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

/// Selector for `accounts:lookup`.
enum Lookup<'a> {
    Uid(&'a str),
    Email(&'a str),
}

pub struct FirebaseAuth {
    config: FirebaseConfig,
    http: reqwest::Client,
    keys: PublicKeyCache,
    id_token_keys: Url,
    session_keys: Url,
    service_account: Option<ServiceAccount>,
}

impl FirebaseAuth {
    /// Builds the client. Admin operations stay unavailable when the service
    /// account credentials are absent.
    pub fn new(config: FirebaseConfig, http: reqwest::Client) -> Result<Self, AuthError> {
        let id_token_keys = Url::parse(&config.id_token_keys_url)
            .map_err(|e| AuthError::NotConfigured(format!("id_token_keys_url: {e}")))?;
        let session_keys = Url::parse(&config.session_keys_url)
            .map_err(|e| AuthError::NotConfigured(format!("session_keys_url: {e}")))?;

        let service_account = match (&config.client_email, config.normalized_private_key()) {
            (Some(email), Some(key)) if !email.is_empty() => Some(ServiceAccount::new(
                http.clone(),
                email.clone(),
                &key,
                config.token_url.clone(),
            )?),
            _ => {
                tracing::warn!("Firebase service account not configured; admin operations disabled");
                None
            }
        };

        let keys = PublicKeyCache::new(
            http.clone(),
            KeyCacheConfig::default().with_allow_http(config.allow_http),
        );

        Ok(Self {
            config,
            http,
            keys,
            id_token_keys,
            session_keys,
            service_account,
        })
    }

    pub fn config(&self) -> &FirebaseConfig {
        &self.config
    }

    pub fn has_admin_credentials(&self) -> bool {
        self.service_account.is_some()
    }

    /// Verifies a client-side ID token.
    pub async fn verify_id_token(&self, token: &str) -> Result<FirebaseClaims, AuthError> {
        self.verify(
            token,
            &self.id_token_keys,
            KeyFormat::JwkSet,
            &self.config.id_token_issuer(),
        )
        .await
    }

    /// Verifies a session cookie. With `check_revoked`, the user record is
    /// fetched and the cookie is rejected if the user is disabled or their
    /// tokens were revoked after the cookie's `auth_time`.
    pub async fn verify_session_cookie(
        &self,
        cookie: &str,
        check_revoked: bool,
    ) -> Result<FirebaseClaims, AuthError> {
        let claims = self
            .verify(
                cookie,
                &self.session_keys,
                KeyFormat::PemMap,
                &self.config.session_cookie_issuer(),
            )
            .await?;

        if check_revoked {
            let user = self
                .get_user(claims.uid())
                .await?
                .ok_or_else(|| AuthError::InvalidToken("user not found".into()))?;
            check_not_revoked(&claims, &user)?;
        }
        Ok(claims)
    }

    async fn verify(
        &self,
        token: &str,
        keys_url: &Url,
        format: KeyFormat,
        issuer: &str,
    ) -> Result<FirebaseClaims, AuthError> {
        if self.config.project_id.is_empty() {
            return Err(AuthError::NotConfigured("firebase.project_id".into()));
        }

        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("missing kid".into()))?;

        let key = self
            .keys
            .get_key(keys_url, format, &kid)
            .await
            .map_err(|e| match e {
                KeyError::KeyNotFound(kid) => {
                    AuthError::InvalidToken(format!("unknown key id {kid}"))
                }
                other => AuthError::Keys(other),
            })?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.config.project_id]);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);

        let data = decode::<FirebaseClaims>(token, &key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        if data.claims.sub.is_empty() || data.claims.sub.len() > 128 {
            return Err(AuthError::InvalidToken("invalid subject".into()));
        }
        Ok(data.claims)
    }

    /// Exchanges an ID token for a session cookie valid for `valid_for`.
    pub async fn create_session_cookie(
        &self,
        id_token: &str,
        valid_for: Duration,
    ) -> Result<String, AuthError> {
        let url = format!(
            "{}/v1/projects/{}:createSessionCookie",
            self.toolkit_base(),
            self.config.project_id
        );
        let body = json!({
            "idToken": id_token,
            "validDuration": valid_for.as_secs().to_string(),
        });
        let response: SessionCookieResponse = self.admin_post(&url, &body).await?;
        Ok(response.session_cookie)
    }

    pub async fn get_user(&self, uid: &str) -> Result<Option<UserRecord>, AuthError> {
        self.lookup(Lookup::Uid(uid)).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        self.lookup(Lookup::Email(email)).await
    }

    async fn lookup(&self, selector: Lookup<'_>) -> Result<Option<UserRecord>, AuthError> {
        let url = format!(
            "{}/v1/projects/{}/accounts:lookup",
            self.toolkit_base(),
            self.config.project_id
        );
        let body = match selector {
            Lookup::Uid(uid) => json!({ "localId": [uid] }),
            Lookup::Email(email) => json!({ "email": [email] }),
        };

        match self.admin_post::<LookupResponse>(&url, &body).await {
            Ok(response) => Ok(response.users.into_iter().next()),
            Err(AuthError::Provider { message, .. }) if message.starts_with("USER_NOT_FOUND") => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Sends the "verify your email" message for the account behind `id_token`.
    pub async fn send_email_verification(
        &self,
        id_token: &str,
        continue_url: Option<&str>,
    ) -> Result<(), AuthError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AuthError::NotConfigured("firebase.api_key".into()))?;

        let url = format!("{}/v1/accounts:sendOobCode", self.toolkit_base());
        let mut body = json!({
            "requestType": "VERIFY_EMAIL",
            "idToken": id_token,
        });
        if let Some(continue_url) = continue_url {
            body["continueUrl"] = json!(continue_url);
        }

        let response = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }
        Ok(())
    }

    async fn admin_post<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, AuthError> {
        let account = self.service_account.as_ref().ok_or_else(|| {
            AuthError::NotConfigured("firebase.client_email / firebase.private_key".into())
        })?;
        let token = account.access_token().await?;

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }
        Ok(response.json().await?)
    }

    fn toolkit_base(&self) -> &str {
        self.config.identity_toolkit_url.trim_end_matches('/')
    }
}

/// Maps an Identity Toolkit error response. Token problems become
/// rejections; everything else is a provider error.
async fn provider_error(response: reqwest::Response) -> AuthError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ProviderErrorBody>(&text)
        .map(|b| b.error.message)
        .unwrap_or(text);

    if message.starts_with("INVALID_ID_TOKEN") || message.starts_with("TOKEN_EXPIRED") {
        return AuthError::InvalidToken(message);
    }
    if message.starts_with("USER_DISABLED") {
        return AuthError::UserDisabled;
    }
    AuthError::Provider { status, message }
}

fn check_not_revoked(claims: &FirebaseClaims, user: &UserRecord) -> Result<(), AuthError> {
    if user.disabled {
        return Err(AuthError::UserDisabled);
    }
    if let (Some(valid_since), Some(auth_time)) = (user.valid_since_secs(), claims.auth_time)
        && auth_time < valid_since
    {
        return Err(AuthError::TokenRevoked);
    }
    Ok(())
}
