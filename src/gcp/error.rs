use serde::Deserialize;
use thiserror::Error;

/// Errors returned by calls against Google APIs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("malformed batch response: {0}")]
    Batch(String),
}

impl ApiError {
    /// Builds an `Http` error from a status code and a raw response body.
    ///
    /// Google wraps failures as `{"error": {"code": .., "message": .., "status": ..}}`;
    /// when the body has that shape only the message is kept.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(env) => match env.error.status {
                Some(s) => format!("{} ({})", env.error.message, s),
                None => env.error.message,
            },
            Err(_) => body.trim().to_string(),
        };
        ApiError::Http { status, message }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for HTTP 429 (quota / rate limiting).
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}
