//! Error types for the App Configuration client.
//!
//! # Design
//! Every response with status >= 400 lands in `HttpError` with the status
//! line and the raw body. Server error payloads do not follow a single
//! schema, so the body is kept as opaque diagnostic text and never parsed.

use thiserror::Error;

/// Errors returned by the key-value client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// An authorizer could not be built or could not produce a token.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// The configured endpoint is not an absolute URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a status of 400 or above.
    #[error("ERROR: {} - Response Body: {body}", status_line(.status, .reason))]
    HttpError { status: u16, reason: String, body: String },

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),
}

/// `599` alone when the status has no reason phrase, `404 Not Found` otherwise.
fn status_line(status: &u16, reason: &str) -> String {
    if reason.is_empty() {
        status.to_string()
    } else {
        format!("{status} {reason}")
    }
}

impl ApiError {
    #[must_use]
    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Build an `HttpError` for `status`, filling in the canonical reason
    /// phrase.
    #[must_use]
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        let reason = ::http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self::HttpError {
            status,
            reason,
            body: body.into(),
        }
    }

    /// The HTTP status carried by this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
