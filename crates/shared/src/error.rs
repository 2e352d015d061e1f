//! Shared error types for the REST client.

use serde_json::Value;

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    /// The backend answered with `success: false`.
    #[error("Rejected by backend: {0}")]
    Rejected(String),
    #[error("No session credential available")]
    MissingCredential,
}

impl ApiError {
    /// Build an error from a non-2xx response, preferring the backend's own
    /// explanation when the body carries one.
    pub fn from_status(status: u16, body: String) -> Self {
        match try_error_message(&body) {
            Some(message) => ApiError::Http {
                status,
                body: message,
            },
            None => ApiError::Http { status, body },
        }
    }
}

/// Attempt to pull a user-facing message out of an error body.
/// Prefers `message`, then `error`, then `detail`.
pub fn try_error_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<Value>(body).ok()?;
    ["message", "error", "detail"]
        .iter()
        .filter_map(|key| parsed.get(key).and_then(Value::as_str))
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}
