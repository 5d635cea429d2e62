use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the collective membership service
#[derive(Debug)]
pub enum CollectiveError {
    /// Configuration or CLI argument errors (fatal at startup)
    Config(String),

    /// Peer unreachable, timed out or answered with an error
    Transport(String),

    /// Credential missing, expired or forged
    Auth(String),

    /// Broadcast payload could not be encoded or decoded
    Codec(String),

    /// API/HTTP related errors
    Api(String),

    /// Requested collective is not configured on this node
    NotFound(String),

    /// System I/O errors
    Io(std::io::Error),

    /// JSON serialization/deserialization errors
    Serialization(serde_json::Error),
}

impl fmt::Display for CollectiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectiveError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CollectiveError::Transport(msg) => write!(f, "Transport error: {}", msg),
            CollectiveError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            CollectiveError::Codec(msg) => write!(f, "Codec error: {}", msg),
            CollectiveError::Api(msg) => write!(f, "API error: {}", msg),
            CollectiveError::NotFound(msg) => write!(f, "Not found: {}", msg),
            CollectiveError::Io(err) => write!(f, "I/O error: {}", err),
            CollectiveError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for CollectiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectiveError::Io(err) => Some(err),
            CollectiveError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, CollectiveError>;

impl CollectiveError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            CollectiveError::Config(_) => StatusCode::BAD_REQUEST,
            CollectiveError::Transport(_) => StatusCode::BAD_GATEWAY,
            CollectiveError::Auth(_) => StatusCode::UNAUTHORIZED,
            CollectiveError::Codec(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CollectiveError::Api(_) => StatusCode::BAD_REQUEST,
            CollectiveError::NotFound(_) => StatusCode::NOT_FOUND,
            CollectiveError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CollectiveError::Serialization(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            CollectiveError::Config(_) => "configuration_error",
            CollectiveError::Transport(_) => "transport_error",
            CollectiveError::Auth(_) => "auth_error",
            CollectiveError::Codec(_) => "codec_error",
            CollectiveError::Api(_) => "api_error",
            CollectiveError::NotFound(_) => "not_found",
            CollectiveError::Io(_) => "io_error",
            CollectiveError::Serialization(_) => "serialization_error",
        }
    }
}

// Axum IntoResponse implementation for HTTP error responses
impl IntoResponse for CollectiveError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

// Conversions from common error types
impl From<std::io::Error> for CollectiveError {
    fn from(err: std::io::Error) -> Self {
        CollectiveError::Io(err)
    }
}

impl From<serde_json::Error> for CollectiveError {
    fn from(err: serde_json::Error) -> Self {
        CollectiveError::Serialization(err)
    }
}

impl From<reqwest::Error> for CollectiveError {
    fn from(err: reqwest::Error) -> Self {
        CollectiveError::Transport(err.to_string())
    }
}

impl From<StatusCode> for CollectiveError {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => CollectiveError::Auth("Peer rejected credential".to_string()),
            StatusCode::NOT_FOUND => {
                CollectiveError::NotFound("Peer does not host this collective".to_string())
            }
            _ => CollectiveError::Transport(format!("HTTP error: {}", status.as_u16())),
        }
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::CollectiveError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::CollectiveError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::CollectiveError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::CollectiveError::Transport(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! auth_error {
    ($msg:expr) => {
        $crate::error::CollectiveError::Auth($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::CollectiveError::Auth(format!($fmt, $($arg)*))
    };
}
