//! User-facing text for failed credential checks.

use serde::Serialize;

/// Why a connection test against Binance failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionFailure {
    pub error: String,
    pub is_geo_restriction: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

/// Maps a Binance error code and message to an explanation for the user.
/// Unrecognised messages are passed through unchanged.
pub fn describe_connection_error(code: Option<i64>, msg: &str) -> ConnectionFailure {
    let lower = msg.to_lowercase();
    let failure = |error: &str, is_geo_restriction: bool| ConnectionFailure {
        error: error.to_string(),
        is_geo_restriction,
        code,
    };

    if lower.contains("restricted location") || lower.contains("eligibility") {
        failure(msg, true)
    } else if lower.contains("invalid api-key") || code == Some(-2014) {
        failure(
            "Invalid API key. Check that you copied it correctly.",
            false,
        )
    } else if lower.contains("signature") || code == Some(-1022) {
        failure(
            "Incorrect API secret. Check that you copied it correctly.",
            false,
        )
    } else if lower.contains("ip") || lower.contains("whitelist") {
        failure(
            "IP not authorized. Check the IP restrictions on your Binance API key.",
            false,
        )
    } else if lower.contains("timestamp") {
        failure("Clock synchronization error. Please try again.", false)
    } else if msg.trim().is_empty() {
        failure("Error connecting to Binance", false)
    } else {
        failure(msg, false)
    }
}
