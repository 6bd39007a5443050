use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Binance answered with its `{code, msg}` error body.
    #[error("Binance error {code}: {msg}")]
    Api { status: u16, code: i64, msg: String },

    /// Non-success response without a Binance error body.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Signed request without credentials")]
    MissingCredentials,
}

impl ExchangeError {
    /// `true` when Binance itself rejected the request.
    pub fn is_api(&self) -> bool {
        matches!(self, ExchangeError::Api { .. })
    }

    /// Message suitable for showing to the account owner.
    pub fn user_message(&self) -> String {
        match self {
            ExchangeError::Api { msg, .. } => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
