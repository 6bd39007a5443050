//! Token verification against mocked Google key and Identity Toolkit endpoints.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cuanted_auth::{AuthError, AuthState, AuthUser, FirebaseAuth, FirebaseConfig, SessionCookieConfig};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT: &str = "cuanted-test";
const KID: &str = "test-key";

struct TestKey {
    private_pem: String,
    public_pem: String,
    n: String,
    e: String,
}

fn test_key() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("keygen");
        let public = private.to_public_key();
        TestKey {
            private_pem: private.to_pkcs8_pem(LineEnding::LF).expect("pem").to_string(),
            public_pem: public.to_public_key_pem(LineEnding::LF).expect("pem"),
            n: URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        }
    })
}

fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

fn sign(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.into());
    let key = EncodingKey::from_rsa_pem(test_key().private_pem.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}

fn id_token_claims(uid: &str, exp: i64) -> Value {
    json!({
        "iss": format!("https://securetoken.google.com/{PROJECT}"),
        "aud": PROJECT,
        "sub": uid,
        "email": "ana@example.com",
        "email_verified": true,
        "auth_time": now() - 60,
        "iat": now() - 60,
        "exp": exp,
    })
}

fn session_claims(uid: &str, auth_time: i64) -> Value {
    json!({
        "iss": format!("https://session.firebase.google.com/{PROJECT}"),
        "aud": PROJECT,
        "sub": uid,
        "email": "ana@example.com",
        "auth_time": auth_time,
        "iat": now() - 60,
        "exp": now() + 3600,
    })
}

async fn mock_google() -> MockServer {
    let server = MockServer::start().await;
    let key = test_key();

    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "public, max-age=3600")
                .set_body_json(json!({
                    "keys": [{"kty": "RSA", "kid": KID, "alg": "RS256", "use": "sig", "n": key.n, "e": key.e}]
                })),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/session-keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ KID: key.public_pem })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "ya29.test", "expires_in": 3600})),
        )
        .mount(&server)
        .await;

    server
}

fn firebase(server: &MockServer, with_service_account: bool) -> FirebaseAuth {
    let base = server.uri();
    let config = FirebaseConfig {
        project_id: PROJECT.into(),
        client_email: with_service_account.then(|| "svc@cuanted-test.iam.gserviceaccount.com".into()),
        private_key: with_service_account.then(|| test_key().private_pem.clone()),
        api_key: Some("web-key".into()),
        id_token_keys_url: format!("{base}/jwks"),
        session_keys_url: format!("{base}/session-keys"),
        identity_toolkit_url: base.clone(),
        token_url: format!("{base}/token"),
        allow_http: true,
    };
    FirebaseAuth::new(config, reqwest::Client::new()).unwrap()
}

#[tokio::test]
async fn verifies_a_valid_id_token() {
    let server = mock_google().await;
    let auth = firebase(&server, false);

    let token = sign(&id_token_claims("uid-1", now() + 3600));
    let claims = auth.verify_id_token(&token).await.unwrap();
    assert_eq!(claims.uid(), "uid-1");
    assert_eq!(claims.email.as_deref(), Some("ana@example.com"));
    assert!(claims.email_verified);
}

#[tokio::test]
async fn rejects_expired_and_foreign_tokens() {
    let server = mock_google().await;
    let auth = firebase(&server, false);

    let expired = sign(&id_token_claims("uid-1", now() - 3600));
    assert!(matches!(
        auth.verify_id_token(&expired).await,
        Err(AuthError::TokenExpired)
    ));

    let mut other_project = id_token_claims("uid-1", now() + 3600);
    other_project["aud"] = json!("someone-else");
    let err = auth.verify_id_token(&sign(&other_project)).await.unwrap_err();
    assert!(err.is_rejection());

    // A session cookie is not an ID token.
    let cookie = sign(&session_claims("uid-1", now() - 60));
    let err = auth.verify_id_token(&cookie).await.unwrap_err();
    assert!(err.is_rejection());
}

#[tokio::test]
async fn session_cookie_is_checked_for_revocation() {
    let server = mock_google().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/projects/{PROJECT}/accounts:lookup")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [{"localId": "uid-1", "email": "ana@example.com", "validSince": now().to_string()}]
        })))
        .mount(&server)
        .await;
    let auth = firebase(&server, true);

    let fresh = sign(&session_claims("uid-1", now() + 10));
    let claims = auth.verify_session_cookie(&fresh, true).await.unwrap();
    assert_eq!(claims.uid(), "uid-1");

    let stale = sign(&session_claims("uid-1", now() - 7200));
    assert!(matches!(
        auth.verify_session_cookie(&stale, true).await,
        Err(AuthError::TokenRevoked)
    ));
    assert!(auth.verify_session_cookie(&stale, false).await.is_ok());
}

#[tokio::test]
async fn creates_session_cookie_with_service_account() {
    let server = mock_google().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/projects/{PROJECT}:createSessionCookie")))
        .and(wiremock::matchers::header("authorization", "Bearer ya29.test"))
        .and(wiremock::matchers::body_partial_json(json!({"validDuration": "432000"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"sessionCookie": "minted-cookie"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    let auth = firebase(&server, true);
    assert!(auth.has_admin_credentials());

    let cookie = auth
        .create_session_cookie("id-token", Duration::from_secs(432_000))
        .await
        .unwrap();
    assert_eq!(cookie, "minted-cookie");
}

#[tokio::test]
async fn provider_token_errors_are_rejections() {
    let server = mock_google().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/projects/{PROJECT}:createSessionCookie")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "INVALID_ID_TOKEN"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/projects/{PROJECT}/accounts:lookup")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "USER_NOT_FOUND"}
        })))
        .mount(&server)
        .await;
    let auth = firebase(&server, true);

    let err = auth
        .create_session_cookie("bad", Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(err.is_rejection());
    assert!(auth.get_user_by_email("nobody@example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn sends_verification_email_with_api_key() {
    let server = mock_google().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:sendOobCode"))
        .and(wiremock::matchers::query_param("key", "web-key"))
        .and(wiremock::matchers::body_partial_json(json!({
            "requestType": "VERIFY_EMAIL",
            "continueUrl": "https://cuanted.com/registro/confirmado"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": "ana@example.com"})))
        .expect(1)
        .mount(&server)
        .await;
    let auth = firebase(&server, false);

    auth.send_email_verification("id-token", Some("https://cuanted.com/registro/confirmado"))
        .await
        .unwrap();
}

async fn whoami(user: AuthUser) -> Json<AuthUser> {
    Json(user)
}

#[tokio::test]
async fn extractor_accepts_bearer_and_cookie() {
    let server = mock_google().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/projects/{PROJECT}/accounts:lookup")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [{"localId": "uid-2", "email": "ana@example.com"}]
        })))
        .mount(&server)
        .await;

    let state = AuthState {
        firebase: Arc::new(firebase(&server, true)),
        supabase: None,
        cookie: SessionCookieConfig::default(),
    };
    let app = Router::new().route("/me", get(whoami)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/me");

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": "Not authenticated"}));

    let token = sign(&id_token_claims("uid-1", now() + 3600));
    let body: Value = client
        .get(&url)
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["uid"], "uid-1");

    let cookie = sign(&session_claims("uid-2", now() - 60));
    let body: Value = client
        .get(&url)
        .header("cookie", format!("session={cookie}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["uid"], "uid-2");

    let response = client
        .get(&url)
        .bearer_auth("garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}
