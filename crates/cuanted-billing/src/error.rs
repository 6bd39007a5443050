use cuanted_api::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    /// The payment provider answered with an error.
    #[error("{provider} API error ({status}): {message}")]
    Provider {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}

impl BillingError {
    pub fn status(&self) -> Option<u16> {
        match self {
            BillingError::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidSignature(_) => ApiError::bad_request("Invalid signature"),
            other => {
                tracing::error!(error = %other, "billing provider failure");
                ApiError::internal("Billing provider error")
            }
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
