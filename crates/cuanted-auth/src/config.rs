//! Authentication configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Firebase project settings.
///
/// `client_email` and `private_key` belong to a service account and are
/// only needed for admin calls (session cookies, user lookups). Token
/// verification needs just `project_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirebaseConfig {
    pub project_id: String,
    pub client_email: Option<String>,
    /// PEM private key. Literal `\n` sequences (as found in env files) are accepted.
    pub private_key: Option<String>,
    /// Web API key, used for email verification.
    pub api_key: Option<String>,
    pub id_token_keys_url: String,
    pub session_keys_url: String,
    pub identity_toolkit_url: String,
    pub token_url: String,
    /// Allow plain-HTTP key URLs. Tests only.
    pub allow_http: bool,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            client_email: None,
            private_key: None,
            api_key: None,
            id_token_keys_url: "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com".into(),
            session_keys_url: "https://www.googleapis.com/identitytoolkit/v3/relyingparty/publicKeys".into(),
            identity_toolkit_url: "https://identitytoolkit.googleapis.com".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            allow_http: false,
        }
    }
}

impl FirebaseConfig {
    pub fn id_token_issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    pub fn session_cookie_issuer(&self) -> String {
        format!("https://session.firebase.google.com/{}", self.project_id)
    }

    pub fn normalized_private_key(&self) -> Option<String> {
        self.private_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(|k| k.replace("\\n", "\n"))
    }
}

/// Supabase project used as a fallback bearer-token verifier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

/// Session cookie attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionCookieConfig {
    pub name: String,
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Sets the `Secure` attribute. Disable only for local HTTP development.
    pub secure: bool,
}

impl Default for SessionCookieConfig {
    fn default() -> Self {
        Self {
            name: "session".into(),
            max_age: Duration::from_secs(60 * 60 * 24 * 5),
            secure: true,
        }
    }
}
