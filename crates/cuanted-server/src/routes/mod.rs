//! HTTP routes under `/api`.
//!
//! Handlers resolve the caller with [`cuanted_auth::AuthUser`], borrow a
//! storage struct from the pool and map library errors to
//! [`cuanted_api::ApiError`] with `?`.

mod auth;
mod exchanges;
mod operations;
mod paypal;
mod pending;
mod profile;
mod server_info;
mod strategies;
mod stripe;
mod webhook;

use axum::Router;
use axum::extract::{FromRequest, FromRequestParts, Query};
use axum::http::HeaderMap;
use axum::http::header::{HOST, ORIGIN};
use cuanted_api::{ApiError, ApiResult};
use cuanted_billing::Reconciliation;
use cuanted_db_postgres::{ProfileStorage, StrategyStorage};
use serde_json::Value;
use uuid::Uuid;

use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(profile::router())
        .merge(exchanges::router())
        .merge(strategies::router())
        .merge(operations::router())
        .merge(pending::router())
        .merge(server_info::router())
        .merge(stripe::router())
        .merge(paypal::router())
        .merge(webhook::router())
}

/// `Json` whose rejection renders as `{"error": ...}`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// `Query` whose rejection renders as `{"error": ...}`.
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);

/// Parses a row id taken from a body or query string.
pub(crate) fn parse_id(raw: Option<&str>) -> ApiResult<Uuid> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing id"))?;
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request("Invalid id"))
}

/// Id from a JSON body, accepting only strings.
pub(crate) fn id_field(body: &Value) -> ApiResult<Uuid> {
    parse_id(body.get("id").and_then(Value::as_str))
}

/// Non-empty, trimmed string field.
pub(crate) fn str_field<'a>(body: &'a Value, name: &str) -> Option<&'a str> {
    body.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Writes a billing reconciliation to the matched profile. Returns the
/// profile id, or `None` when no profile matched.
pub(crate) async fn apply_reconciliation(
    state: &AppState,
    reconciliation: &Reconciliation,
) -> ApiResult<Option<String>> {
    let uid = ProfileStorage::new(&state.pool)
        .apply_change(reconciliation.target.as_key(), &reconciliation.change)
        .await?;
    match uid.as_deref() {
        Some(uid) => {
            tracing::info!(uid, profile = ?reconciliation.target, "billing state updated");
            if reconciliation.deactivate_strategies {
                let count = StrategyStorage::new(&state.pool).deactivate_all(uid).await?;
                tracing::info!(uid, count, "strategies deactivated");
            }
        }
        None => {
            tracing::warn!(profile = ?reconciliation.target, "no profile matched billing event");
        }
    }
    Ok(uid)
}

/// Origin of the calling page: `Origin`, else `http(s)://Host`, else the
/// configured site URL.
pub(crate) fn request_origin(headers: &HeaderMap, site_url: &str) -> String {
    if let Some(origin) = headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && *v != "null")
    {
        return origin.trim_end_matches('/').to_string();
    }
    if let Some(host) = headers.get(HOST).and_then(|v| v.to_str().ok()) {
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("https");
        return format!("{proto}://{host}");
    }
    site_url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn ids_must_be_present_and_uuid() {
        assert_eq!(
            parse_id(None).unwrap_err().to_body().error,
            "Missing id"
        );
        assert_eq!(parse_id(Some("  ")).unwrap_err().to_body().error, "Missing id");
        assert_eq!(
            parse_id(Some("42")).unwrap_err().to_body().error,
            "Invalid id"
        );
        let id = Uuid::new_v4();
        assert_eq!(id_field(&json!({"id": id.to_string()})).unwrap(), id);
        assert!(id_field(&json!({"id": 7})).is_err());
    }

    #[test]
    fn origin_prefers_origin_then_host() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            request_origin(&headers, "https://cuanted.com/"),
            "https://cuanted.com"
        );

        headers.insert(HOST, HeaderValue::from_static("app.cuanted.com"));
        assert_eq!(
            request_origin(&headers, "https://cuanted.com"),
            "https://app.cuanted.com"
        );

        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
        assert_eq!(
            request_origin(&headers, "https://cuanted.com"),
            "http://app.cuanted.com"
        );

        headers.insert(ORIGIN, HeaderValue::from_static("http://localhost:3000"));
        assert_eq!(
            request_origin(&headers, "https://cuanted.com"),
            "http://localhost:3000"
        );
    }

    #[test]
    fn string_fields_are_trimmed() {
        let body = json!({"name": "  BTC  ", "empty": " ", "n": 1});
        assert_eq!(str_field(&body, "name"), Some("BTC"));
        assert_eq!(str_field(&body, "empty"), None);
        assert_eq!(str_field(&body, "n"), None);
        assert_eq!(str_field(&body, "missing"), None);
    }
}
