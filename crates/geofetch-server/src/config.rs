//! Gateway configuration: optional TOML init file, environment variables,
//! CLI overrides.
//!
//! Precedence, lowest first: built-in defaults, `[server]` / `[access]` /
//! `[upstream]` / `[relay]` sections of the init file, environment
//! variables, CLI flags. The result is an immutable [`GatewayConfig`] that
//! is built once at startup and shared behind an `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use geofetch_core::{GatewayError, GatewayResult};
use serde::Deserialize;
use tracing::info;

/// Top-level init file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub access: AccessSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub relay: RelaySection,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// `[access]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessSection {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for AccessSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            allowed_domains: default_allowed_domains(),
            blocked_domains: Vec::new(),
            rate_limit: default_rate_limit(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            trust_forwarded_for: false,
        }
    }
}

/// `[upstream]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_body")]
    pub max_response_size: u64,
    #[serde(default)]
    pub proxy: String,
    #[serde(default = "default_proxy_scheme")]
    pub proxy_scheme: String,
    #[serde(default)]
    pub proxy_user: String,
    #[serde(default)]
    pub proxy_pass: String,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default)]
    pub egress_probe_url: String,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_response_size: default_max_body(),
            proxy: String::new(),
            proxy_scheme: default_proxy_scheme(),
            proxy_user: String::new(),
            proxy_pass: String::new(),
            follow_redirects: true,
            egress_probe_url: String::new(),
        }
    }
}

/// `[relay]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_true")]
    pub enable_legacy_path: bool,
    #[serde(default = "default_true")]
    pub enable_fetch_path: bool,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
    #[serde(default)]
    pub strip_headers: Vec<String>,
    #[serde(default = "default_max_body")]
    pub max_request_size: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            enable_legacy_path: true,
            enable_fetch_path: true,
            enable_cors: true,
            strip_headers: Vec::new(),
            max_request_size: default_max_body(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_allowed_domains() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_rate_limit() -> u32 {
    100
}
fn default_rate_limit_window_ms() -> u64 {
    60_000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_body() -> u64 {
    10 * 1024 * 1024
}
fn default_proxy_scheme() -> String {
    "http".to_string()
}
fn default_true() -> bool {
    true
}

/// A string that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    #[cfg(test)]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Second-hop proxy the gateway routes its own egress through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamProxy {
    /// `scheme://host:port`.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<Secret>,
}

/// Resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    /// `None` disables the API-key check.
    pub api_key: Option<Secret>,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    /// Requests per window; `0` disables rate limiting.
    pub rate_limit: u32,
    pub rate_limit_window: Duration,
    pub trust_forwarded_for: bool,
    pub timeout: Duration,
    pub max_response_size: u64,
    pub max_request_size: u64,
    pub upstream_proxy: Option<UpstreamProxy>,
    pub follow_redirects: bool,
    pub egress_probe_url: Option<String>,
    pub enable_legacy_path: bool,
    pub enable_fetch_path: bool,
    pub enable_cors: bool,
    pub strip_headers: Vec<String>,
}

impl GatewayConfig {
    /// Load the init file (if any), then apply environment and CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        env: &HashMap<String, String>,
        cli_port: Option<u16>,
    ) -> GatewayResult<Self> {
        let file = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded).map_err(|e| {
                        GatewayError::Config(format!("cannot read {}: {e}", expanded.display()))
                    })?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| GatewayError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::from_sources(file, env, cli_port)
    }

    /// Merge an already-parsed init file with environment and CLI overrides.
    pub fn from_sources(
        file: ConfigFile,
        env: &HashMap<String, String>,
        cli_port: Option<u16>,
    ) -> GatewayResult<Self> {
        let ConfigFile {
            server,
            access,
            upstream,
            relay,
        } = file;

        let port = match cli_port {
            Some(p) => p,
            None => env_parse(env, "PORT")?.unwrap_or(server.port),
        };
        let bind = env_str(env, "BIND")
            .map(str::to_string)
            .unwrap_or(server.bind);

        let api_key = env_str(env, "API_KEY")
            .map(str::to_string)
            .unwrap_or(access.api_key);
        let api_key = Some(api_key.trim().to_string())
            .filter(|k| !k.is_empty())
            .map(Secret);

        let allowed_domains = env_list(env, "ALLOWED_DOMAINS").unwrap_or(access.allowed_domains);
        let blocked_domains = env_list(env, "BLOCKED_DOMAINS").unwrap_or(access.blocked_domains);
        let rate_limit = env_parse(env, "RATE_LIMIT")?.unwrap_or(access.rate_limit);
        let window_ms: u64 =
            env_parse(env, "RATE_LIMIT_WINDOW")?.unwrap_or(access.rate_limit_window_ms);
        if rate_limit > 0 && window_ms == 0 {
            return Err(GatewayError::Config(
                "RATE_LIMIT_WINDOW must be positive when RATE_LIMIT is set".into(),
            ));
        }
        let trust_forwarded_for =
            env_bool(env, "TRUST_FORWARDED_FOR")?.unwrap_or(access.trust_forwarded_for);

        let timeout_secs: u64 = env_parse(env, "TIMEOUT")?.unwrap_or(upstream.timeout_secs);
        if timeout_secs == 0 {
            return Err(GatewayError::Config("TIMEOUT must be positive".into()));
        }
        let max_response_size =
            env_parse(env, "MAX_RESPONSE_SIZE")?.unwrap_or(upstream.max_response_size);
        let follow_redirects =
            env_bool(env, "FOLLOW_REDIRECTS")?.unwrap_or(upstream.follow_redirects);
        let egress_probe_url = env_str(env, "EGRESS_PROBE_URL")
            .map(str::to_string)
            .unwrap_or(upstream.egress_probe_url);
        let egress_probe_url = Some(egress_probe_url).filter(|u| !u.trim().is_empty());

        let proxy_address = env_str(env, "UPSTREAM_PROXY")
            .map(str::to_string)
            .unwrap_or(upstream.proxy);
        let proxy_scheme = env_str(env, "UPSTREAM_PROXY_SCHEME")
            .map(str::to_string)
            .unwrap_or(upstream.proxy_scheme);
        let proxy_user = env_str(env, "UPSTREAM_PROXY_USER")
            .map(str::to_string)
            .unwrap_or(upstream.proxy_user);
        let proxy_pass = env_str(env, "UPSTREAM_PROXY_PASS")
            .map(str::to_string)
            .unwrap_or(upstream.proxy_pass);
        let upstream_proxy = build_upstream_proxy(&proxy_address, &proxy_scheme, proxy_user, proxy_pass)?;

        let enable_legacy_path =
            env_bool(env, "ENABLE_LEGACY_PATH")?.unwrap_or(relay.enable_legacy_path);
        let enable_fetch_path =
            env_bool(env, "ENABLE_FETCH_PATH")?.unwrap_or(relay.enable_fetch_path);
        let enable_cors = env_bool(env, "ENABLE_CORS")?.unwrap_or(relay.enable_cors);
        let strip_headers = env_list(env, "STRIP_HEADERS").unwrap_or(relay.strip_headers);
        let max_request_size =
            env_parse(env, "MAX_REQUEST_SIZE")?.unwrap_or(relay.max_request_size);

        Ok(Self {
            bind,
            port,
            api_key,
            allowed_domains,
            blocked_domains,
            rate_limit,
            rate_limit_window: Duration::from_millis(window_ms),
            trust_forwarded_for,
            timeout: Duration::from_secs(timeout_secs),
            max_response_size,
            max_request_size,
            upstream_proxy,
            follow_redirects,
            egress_probe_url,
            enable_legacy_path,
            enable_fetch_path,
            enable_cors,
            strip_headers,
        })
    }

    /// `bind:port` to listen on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn build_upstream_proxy(
    address: &str,
    scheme: &str,
    user: String,
    pass: String,
) -> GatewayResult<Option<UpstreamProxy>> {
    let address = address.trim();
    if address.is_empty() {
        return Ok(None);
    }
    let url = if address.contains("://") {
        address.to_string()
    } else {
        match scheme {
            "http" | "https" => format!("{scheme}://{address}"),
            other => {
                return Err(GatewayError::Config(format!(
                    "unsupported UPSTREAM_PROXY_SCHEME: {other}"
                )))
            }
        }
    };
    let username = Some(user).filter(|u| !u.is_empty());
    let password = Some(pass).filter(|p| !p.is_empty()).map(Secret);
    if password.is_some() && username.is_none() {
        return Err(GatewayError::Config(
            "UPSTREAM_PROXY_PASS requires UPSTREAM_PROXY_USER".into(),
        ));
    }
    Ok(Some(UpstreamProxy {
        url,
        username,
        password,
    }))
}

fn env_str<'a>(env: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    env.get(name).map(String::as_str)
}

fn env_parse<T>(env: &HashMap<String, String>, name: &str) -> GatewayResult<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env_str(env, name).map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| GatewayError::Config(format!("invalid {name}={raw:?}: {e}"))),
        None => Ok(None),
    }
}

fn env_bool(env: &HashMap<String, String>, name: &str) -> GatewayResult<Option<bool>> {
    match env_str(env, name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(GatewayError::Config(format!("invalid {name}={v:?}: expected a boolean"))),
        },
    }
}

/// Comma-separated list. A set-but-empty variable yields an empty list.
fn env_list(env: &HashMap<String, String>, name: &str) -> Option<Vec<String>> {
    env_str(env, name).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = GatewayConfig::from_sources(ConfigFile::default(), &HashMap::new(), None).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.allowed_domains, vec!["*".to_string()]);
        assert!(cfg.blocked_domains.is_empty());
        assert_eq!(cfg.rate_limit, 100);
        assert_eq!(cfg.rate_limit_window, Duration::from_millis(60_000));
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_response_size, 10_485_760);
        assert!(cfg.upstream_proxy.is_none());
        assert!(cfg.enable_legacy_path && cfg.enable_fetch_path && cfg.enable_cors);
    }

    #[test]
    fn environment_overrides_defaults() {
        let cfg = GatewayConfig::from_sources(
            ConfigFile::default(),
            &env(&[
                ("PORT", "3129"),
                ("API_KEY", "s3cret"),
                ("ALLOWED_DOMAINS", "law.go.kr, *.korea.kr"),
                ("BLOCKED_DOMAINS", "evil.law.go.kr"),
                ("RATE_LIMIT", "2"),
                ("RATE_LIMIT_WINDOW", "1000"),
                ("TIMEOUT", "5"),
                ("MAX_RESPONSE_SIZE", "1024"),
                ("ENABLE_LEGACY_PATH", "off"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(cfg.port, 3129);
        assert_eq!(cfg.api_key.as_ref().map(Secret::expose), Some("s3cret"));
        assert_eq!(cfg.allowed_domains, vec!["law.go.kr", "*.korea.kr"]);
        assert_eq!(cfg.blocked_domains, vec!["evil.law.go.kr"]);
        assert_eq!(cfg.rate_limit, 2);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(1));
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_response_size, 1024);
        assert!(!cfg.enable_legacy_path);
    }

    #[test]
    fn empty_api_key_disables_auth() {
        let cfg =
            GatewayConfig::from_sources(ConfigFile::default(), &env(&[("API_KEY", "  ")]), None)
                .unwrap();
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn cli_port_wins_over_environment() {
        let cfg =
            GatewayConfig::from_sources(ConfigFile::default(), &env(&[("PORT", "1")]), Some(9000))
                .unwrap();
        assert_eq!(cfg.port, 9000);
    }

    #[test]
    fn upstream_proxy_with_credentials() {
        let cfg = GatewayConfig::from_sources(
            ConfigFile::default(),
            &env(&[
                ("UPSTREAM_PROXY", "nas.local:3128"),
                ("UPSTREAM_PROXY_USER", "user"),
                ("UPSTREAM_PROXY_PASS", "pass"),
            ]),
            None,
        )
        .unwrap();
        let proxy = cfg.upstream_proxy.unwrap();
        assert_eq!(proxy.url, "http://nas.local:3128");
        assert_eq!(proxy.username.as_deref(), Some("user"));
        assert_eq!(proxy.password.as_ref().map(Secret::expose), Some("pass"));
        assert!(!format!("{proxy:?}").contains("pass\""));
    }

    #[test]
    fn invalid_numbers_and_booleans_are_errors() {
        for pairs in [
            [("RATE_LIMIT", "lots")],
            [("TIMEOUT", "0")],
            [("ENABLE_CORS", "maybe")],
            [("PORT", "99999")],
        ] {
            let result = GatewayConfig::from_sources(ConfigFile::default(), &env(&pairs), None);
            assert!(matches!(result, Err(GatewayError::Config(_))), "{pairs:?}");
        }
    }

    #[test]
    fn parse_toml_init_file() {
        let toml_str = r#"
[server]
port = 3129

[access]
api_key = "from-file"
allowed_domains = ["law.go.kr"]

[upstream]
proxy = "localhost:3128"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cfg = GatewayConfig::from_sources(file, &env(&[("API_KEY", "from-env")]), None).unwrap();
        assert_eq!(cfg.port, 3129);
        assert_eq!(cfg.api_key.as_ref().map(Secret::expose), Some("from-env"));
        assert_eq!(cfg.allowed_domains, vec!["law.go.kr"]);
        assert_eq!(cfg.upstream_proxy.unwrap().url, "http://localhost:3128");
        assert_eq!(cfg.rate_limit, 100);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let cfg = GatewayConfig::load(
            Some(Path::new("/nonexistent/geofetch/config.toml")),
            &HashMap::new(),
            None,
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
    }
}
