use std::time::Duration;

use thiserror::Error;

use crate::governor::RateClass;

/// Everything that can go wrong between the wiki API and a parsed record
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("rate limit exceeded for {class} requests after {retries} retries")]
    RateLimitExceeded { class: RateClass, retries: u32 },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("API error {code}: {info}")]
    Api { code: String, info: String },

    #[error("could not decode API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

impl ScrapeError {
    /// Throttling that survived every retry or that the API reported as an
    /// error code, as opposed to a transport or remote fault
    pub fn is_throttled(&self) -> bool {
        match self {
            ScrapeError::RateLimitExceeded { .. } => true,
            ScrapeError::Api { code, .. } => code == "ratelimited",
            _ => false,
        }
    }

    /// The API answered that the requested page does not exist
    pub fn is_missing_page(&self) -> bool {
        matches!(
            self,
            ScrapeError::Api { code, .. } if code == "missingtitle" || code == "invalidtitle"
        )
    }
}
