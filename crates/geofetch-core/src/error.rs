use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a request target could not be turned into a [`crate::TargetUrl`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The Base64URL token is empty, contains characters outside the
    /// alphabet, has an impossible length, or is not UTF-8 once decoded.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// The decoded string does not start with `http://` or `https://`.
    #[error("invalid scheme: only http:// and https:// targets are allowed")]
    InvalidScheme,

    /// The scheme is fine but the remainder is not a usable absolute URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl DecodeError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            DecodeError::InvalidEncoding(_) => "invalid-encoding",
            DecodeError::InvalidScheme => "invalid-scheme",
            DecodeError::InvalidUrl(_) => "invalid-url",
        }
    }
}

/// Errors produced while handling a gateway request.
///
/// Every variant maps to exactly one HTTP status and error code; see
/// [`GatewayError::status`] and [`GatewayError::code`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("missing or invalid API key")]
    Unauthorized,

    #[error("target host is not allowed: {0}")]
    Forbidden(String),

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("upstream response exceeds {limit} bytes")]
    ResponseTooLarge { limit: u64 },

    #[error("request body exceeds {limit} bytes")]
    RequestTooLarge { limit: u64 },

    #[error("no route for {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected failure. The detail is for server-side logs only.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status code this error is reported with.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Decode(_) => 400,
            GatewayError::Unauthorized => 401,
            GatewayError::Forbidden(_) => 403,
            GatewayError::NotFound(_) => 404,
            GatewayError::RequestTooLarge { .. } => 413,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::UpstreamUnreachable(_) | GatewayError::ResponseTooLarge { .. } => 502,
            GatewayError::UpstreamTimeout(_) => 504,
            GatewayError::Config(_) | GatewayError::Internal(_) => 500,
        }
    }

    /// Machine-readable error code placed in the `error` field of the body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Decode(e) => e.code(),
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::RateLimited { .. } => "rate-limited",
            GatewayError::UpstreamTimeout(_) => "upstream-timeout",
            GatewayError::UpstreamUnreachable(_) => "upstream-unreachable",
            GatewayError::ResponseTooLarge { .. } => "response-too-large",
            GatewayError::RequestTooLarge { .. } => "request-too-large",
            GatewayError::NotFound(_) => "not-found",
            GatewayError::Config(_) | GatewayError::Internal(_) => "internal-error",
        }
    }

    /// Build the client-facing JSON body. Internal details are replaced by
    /// a generic message.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            GatewayError::Config(_) | GatewayError::Internal(_) => {
                "internal error while handling the request".to_string()
            }
            other => other.to_string(),
        };
        ErrorBody {
            error: self.code().to_string(),
            message,
        }
    }
}

/// JSON error body: `{"error": <code>, "message": <human text>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn to_json(&self) -> String {
        // Two plain string fields cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"error":"internal-error","message":"internal error"}"#.to_string()
        })
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
