//! Where the client finds its gateway.
//!
//! Environment variables win. When `GEOFETCH_GATEWAY_URL` is set, the key
//! comes from `GEOFETCH_GATEWAY_API_KEY` only and the config file is not
//! read. Otherwise `~/.geofetch/config.toml` is consulted:
//!
//! ```toml
//! [gateway]
//! url = "https://gateway.example.com"
//! api_key = "..."
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

pub const ENV_GATEWAY_URL: &str = "GEOFETCH_GATEWAY_URL";
pub const ENV_GATEWAY_API_KEY: &str = "GEOFETCH_GATEWAY_API_KEY";

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    gateway: GatewaySection,
}

#[derive(Debug, Default, Deserialize)]
struct GatewaySection {
    #[serde(default)]
    url: String,
    #[serde(default)]
    api_key: String,
}

/// Resolved gateway URL and key.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientSettings {
    /// Base URL without a trailing `/`.
    pub gateway_url: Option<String>,
    pub api_key: Option<String>,
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("gateway_url", &self.gateway_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ClientSettings {
    /// Load from the process environment and the default config file.
    pub fn load() -> ClientResult<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_sources(&env, Self::default_path().as_deref())
    }

    /// `~/.geofetch/config.toml`, if a home directory exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".geofetch").join("config.toml"))
    }

    pub fn from_sources(env: &HashMap<String, String>, file: Option<&Path>) -> ClientResult<Self> {
        if let Some(url) = non_empty(env.get(ENV_GATEWAY_URL).map(String::as_str)) {
            return Ok(Self {
                gateway_url: Some(url.trim_end_matches('/').to_string()),
                api_key: non_empty(env.get(ENV_GATEWAY_API_KEY).map(String::as_str))
                    .map(str::to_string),
            });
        }

        let Some(path) = file.filter(|p| p.exists()) else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Settings(format!("cannot read {}: {e}", path.display())))?;
        let parsed: SettingsFile = toml::from_str(&content)
            .map_err(|e| ClientError::Settings(format!("cannot parse {}: {e}", path.display())))?;
        debug!(path = %path.display(), "loaded gateway settings");

        Ok(Self {
            gateway_url: non_empty(Some(&parsed.gateway.url))
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            api_key: non_empty(Some(&parsed.gateway.api_key)).map(str::to_string),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.gateway_url.is_some()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
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

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("geofetch-{}-{name}", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn environment_wins_and_trims_slash() {
        let file = write_temp("env-wins.toml", "[gateway]\nurl = \"https://file.example\"\napi_key = \"file-key\"\n");
        let s = ClientSettings::from_sources(
            &env(&[(ENV_GATEWAY_URL, "https://gw.example/")]),
            Some(&file),
        )
        .unwrap();
        assert_eq!(s.gateway_url.as_deref(), Some("https://gw.example"));
        // The file's key is not mixed with the environment's URL.
        assert!(s.api_key.is_none());
        std::fs::remove_file(file).ok();
    }

    #[test]
    fn file_used_when_env_absent() {
        let file = write_temp("file.toml", "[gateway]\nurl = \"https://file.example//\"\napi_key = \"k\"\n");
        let s = ClientSettings::from_sources(&HashMap::new(), Some(&file)).unwrap();
        assert_eq!(s.gateway_url.as_deref(), Some("https://file.example"));
        assert_eq!(s.api_key.as_deref(), Some("k"));
        assert!(s.is_configured());
        assert!(!format!("{s:?}").contains("\"k\""));
        std::fs::remove_file(file).ok();
    }

    #[test]
    fn nothing_configured() {
        let s = ClientSettings::from_sources(
            &env(&[(ENV_GATEWAY_URL, "  ")]),
            Some(Path::new("/nonexistent/geofetch.toml")),
        )
        .unwrap();
        assert!(!s.is_configured());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = write_temp("bad.toml", "[gateway\nurl = ");
        let err = ClientSettings::from_sources(&HashMap::new(), Some(&file)).unwrap_err();
        assert!(matches!(err, ClientError::Settings(_)));
        std::fs::remove_file(file).ok();
    }
}
