//! The gateway client.
//!
//! `GatewayClient` wraps one reqwest client and the resolved settings. Each
//! `fetch` encodes the target, sends it to `{gateway}/fetch/<token>`, and
//! retries transient failures.

use std::time::Duration;

use geofetch_core::{encode_target, ErrorBody, TargetUrl, API_KEY_HEADER};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::settings::ClientSettings;

/// Request behaviour.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Total attempts for gateway requests (at least one is always made).
    pub max_retries: u32,
    /// Wait before retry `n` (zero-based) is `(n + 1) * backoff_base`.
    pub backoff_base: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

/// `/health` response.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayHealth {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub egress: Option<EgressInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressInfo {
    pub mode: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub probe_error: Option<String>,
}

/// Fetches URLs through the gateway, or directly.
pub struct GatewayClient {
    http: reqwest::Client,
    settings: ClientSettings,
    options: ClientOptions,
}

impl GatewayClient {
    pub fn new(settings: ClientSettings, options: ClientOptions) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("geofetch/", env!("CARGO_PKG_VERSION")))
            .timeout(options.timeout)
            .build()
            .map_err(|e| ClientError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            settings,
            options,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// `{gateway}/fetch/<token>` for `url`.
    pub fn gateway_fetch_url(&self, url: &str) -> ClientResult<String> {
        let gateway = self
            .settings
            .gateway_url
            .as_deref()
            .ok_or(ClientError::NotConfigured)?;
        Ok(format!("{gateway}/fetch/{}", encode_target(url)))
    }

    /// Fetch `url` through the gateway.
    ///
    /// 401 and 403 fail immediately. 5xx responses, connection failures and
    /// timeouts are retried up to [`ClientOptions::max_retries`] attempts in
    /// total; the last error is returned if every attempt fails.
    pub async fn fetch(&self, url: &str) -> ClientResult<String> {
        TargetUrl::parse(url)?;
        let full_url = self.gateway_fetch_url(url)?;
        let attempts = self.options.max_retries.max(1);

        let mut attempt = 0;
        loop {
            match self.fetch_once(&full_url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let wait = self.options.backoff_base * (attempt + 1);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        attempts,
                        wait_ms = wait.as_millis() as u64,
                        "gateway request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, full_url: &str) -> ClientResult<String> {
        let mut request = self.http.get(full_url);
        if let Some(key) = &self.settings.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        debug!(%status, "gateway responded");

        match status {
            s if s.is_success() => response.text().await.map_err(|e| self.classify(e)),
            StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
            StatusCode::FORBIDDEN => Err(ClientError::Forbidden {
                api_key_configured: self.settings.api_key.is_some(),
                message: error_message(response).await,
            }),
            s => Err(ClientError::Status {
                status: s.as_u16(),
                message: error_message(response).await,
            }),
        }
    }

    /// Fetch `url` without the gateway. Single attempt.
    pub async fn fetch_direct(&self, url: &str) -> ClientResult<String> {
        TargetUrl::parse(url)?;
        let response = self.http.get(url).send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("error").to_string(),
            });
        }
        response.text().await.map_err(|e| self.classify(e))
    }

    /// Fetch through the gateway when `use_gateway` says so, or, when it is
    /// `None`, whenever a gateway is configured.
    pub async fn fetch_url(&self, url: &str, use_gateway: Option<bool>) -> ClientResult<String> {
        if use_gateway.unwrap_or_else(|| self.settings.is_configured()) {
            self.fetch(url).await
        } else {
            self.fetch_direct(url).await
        }
    }

    /// Query the gateway's `/health` endpoint. Single attempt.
    pub async fn health(&self) -> ClientResult<GatewayHealth> {
        let gateway = self
            .settings
            .gateway_url
            .as_deref()
            .ok_or(ClientError::NotConfigured)?;
        let response = self
            .http
            .get(format!("{gateway}/health"))
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: error_message(response).await,
            });
        }
        response
            .json::<GatewayHealth>()
            .await
            .map_err(|e| ClientError::Request(format!("invalid /health body: {e}")))
    }

    fn classify(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.options.timeout)
        } else if err.is_connect() {
            ClientError::Connect(err.to_string())
        } else {
            ClientError::Request(err.to_string())
        }
    }
}

/// The gateway's JSON error message, or the raw body, or the reason phrase.
async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
        return format!("{} ({})", body.message, body.error);
    }
    let text = text.trim();
    if text.is_empty() {
        status.canonical_reason().unwrap_or("error").to_string()
    } else {
        text.chars().take(200).collect()
    }
}
