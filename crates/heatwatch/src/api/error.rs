//! Errors from the heatmap backend layer.

use thiserror::Error;

/// Maximum length of a response body kept in errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status code.
    #[error("Backend error ({status}): {body}")]
    Status { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The HTTP client could not be constructed.
    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

impl ApiError {
    /// Builds a status error, truncating the body.
    pub fn status(status: u16, body: &str) -> Self {
        ApiError::Status {
            status,
            body: truncate_body(body),
        }
    }

    /// The backend's own error text, if the body carried one.
    ///
    /// Looks for an `error` or `detail` string in a JSON body.
    pub fn backend_message(&self) -> Option<String> {
        let ApiError::Status { body, .. } = self else {
            return None;
        };
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        ["error", "detail"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
            .map(|s| s.to_string())
    }

    /// Whether a retry could reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Request(_) | ApiError::Decode(_) => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::Client(_) => false,
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}
