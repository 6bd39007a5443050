//! Supabase Auth, used as a fallback verifier for bearer tokens.

use serde::Deserialize;

use crate::config::SupabaseConfig;
use crate::error::AuthError;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SupabaseUser {
    pub id: String,
    pub email: Option<String>,
}

pub struct SupabaseAuth {
    base_url: String,
    anon_key: String,
    http: reqwest::Client,
}

impl SupabaseAuth {
    pub fn new(config: &SupabaseConfig, http: reqwest::Client) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            http,
        }
    }

    /// Resolves an access token to its user. `None` when Supabase rejects it.
    pub async fn get_user(&self, access_token: &str) -> Result<Option<SupabaseUser>, AuthError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AuthError::Provider {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(Some(response.json().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SupabaseAuth {
        SupabaseAuth::new(
            &SupabaseConfig {
                url: format!("{}/", server.uri()),
                anon_key: "anon".into(),
            },
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn resolves_user_for_valid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("apikey", "anon"))
            .and(header("authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "sb-uid",
                "email": "ana@example.com",
                "aud": "authenticated"
            })))
            .mount(&server)
            .await;

        let user = client(&server).get_user("good").await.unwrap().unwrap();
        assert_eq!(user.id, "sb-uid");
        assert_eq!(user.email.as_deref(), Some("ana@example.com"));
    }

    #[tokio::test]
    async fn rejected_token_resolves_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(client(&server).get_user("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_errors_propagate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let err = client(&server).get_user("t").await.unwrap_err();
        assert!(matches!(err, AuthError::Provider { status: 503, .. }));
    }
}
