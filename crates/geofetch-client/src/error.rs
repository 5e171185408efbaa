use std::time::Duration;

use geofetch_core::DecodeError;
use thiserror::Error;

use crate::settings::ENV_GATEWAY_API_KEY;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("gateway not configured: set GEOFETCH_GATEWAY_URL or add [gateway] url to the config file")]
    NotConfigured,

    #[error("target rejected before sending: {0}")]
    Target(#[from] DecodeError),

    #[error("gateway authentication failed (401): check GEOFETCH_GATEWAY_API_KEY")]
    Unauthorized,

    /// 403 from the gateway. Without a configured key the most likely cause
    /// is a gateway that requires one.
    #[error("{}", forbidden_message(.api_key_configured, .message))]
    Forbidden {
        api_key_configured: bool,
        message: String,
    },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("settings error: {0}")]
    Settings(String),
}

impl ClientError {
    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Status { status, .. } => *status >= 500,
            ClientError::Timeout(_) | ClientError::Connect(_) => true,
            _ => false,
        }
    }
}

fn forbidden_message(api_key_configured: &bool, message: &str) -> String {
    if *api_key_configured {
        format!("gateway access forbidden (403): {message}")
    } else {
        format!(
            "gateway access forbidden (403): {message}; no API key is configured, set {ENV_GATEWAY_API_KEY} if the gateway requires one"
        )
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
