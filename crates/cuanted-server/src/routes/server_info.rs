//! Diagnostics for Binance IP allowlisting: the server's outbound IP and
//! the forwarding headers it sees.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/server-info", get(server_info))
}

const REDACTED_HEADERS: &[&str] = &["authorization", "cookie"];

#[derive(Debug, Deserialize)]
struct IpLookup {
    ip: String,
}

async fn outbound_ip(state: &AppState) -> Option<String> {
    let lookup = &state.config.server_info;
    let response = state
        .http
        .get(&lookup.ip_lookup_url)
        .timeout(lookup.timeout)
        .send()
        .await
        .and_then(|r| r.error_for_status());
    match response {
        Ok(response) => match response.json::<IpLookup>().await {
            Ok(body) => Some(body.ip),
            Err(e) => {
                tracing::warn!(error = %e, "unexpected IP lookup response");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "outbound IP lookup failed");
            None
        }
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !REDACTED_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

async fn server_info(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let header_value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339).ok();

    Json(json!({
        "outbound_ip": outbound_ip(&state).await,
        "forwarded_for": header_value("x-forwarded-for"),
        "real_ip": header_value("x-real-ip"),
        "headers": header_map(&headers),
        "timestamp": timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn credentials_are_not_echoed() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        headers.insert("cookie", HeaderValue::from_static("session=x"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.7"));

        let map = header_map(&headers);
        assert_eq!(map.len(), 1);
        assert_eq!(map["x-real-ip"], "203.0.113.7");
    }
}
