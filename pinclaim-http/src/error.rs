//! Errors raised by the HTTP collaborator clients.

use pinclaim::oracle::OracleError;
use pinclaim::store::StoreError;
use reqwest::StatusCode;

/// Errors that can occur while talking to the price service or the IPFS node.
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The response body is not the expected JSON.
    #[error("failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// Unexpected HTTP status code.
    #[error("unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("failed to read response body: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The response parsed but its values are unusable.
    #[error("malformed response: {context}: {reason}")]
    Malformed {
        /// Human-readable context.
        context: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

impl HttpClientError {
    /// Returns `true` if the IPFS node reported that it does not hold the object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::HttpStatus { status, body, .. } => {
                *status == StatusCode::NOT_FOUND
                    || body.contains("not pinned")
                    || body.contains("not found")
                    || body.contains("does not exist")
            }
            _ => false,
        }
    }
}

impl From<HttpClientError> for OracleError {
    fn from(value: HttpClientError) -> Self {
        match value {
            HttpClientError::JsonDeserialization { .. } | HttpClientError::Malformed { .. } => {
                Self::Malformed(value.to_string())
            }
            _ => Self::Unavailable(value.to_string()),
        }
    }
}

impl From<HttpClientError> for StoreError {
    fn from(value: HttpClientError) -> Self {
        if value.is_not_found() {
            return Self::NotFound(value.to_string());
        }
        match &value {
            HttpClientError::HttpStatus { status, .. } if status.is_client_error() => {
                Self::Rejected(value.to_string())
            }
            _ => Self::Unavailable(value.to_string()),
        }
    }
}
