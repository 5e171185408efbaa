//! Target URLs and inbound route classification.
//!
//! A request reaches the gateway in one of three shapes:
//!
//! | Request target                    | Route                     |
//! |-----------------------------------|---------------------------|
//! | `/health`                         | [`Route::Health`]         |
//! | `/fetch/<token>[?query]`          | [`Route::Encoded`]        |
//! | `/<scheme>://<rest>`              | [`Route::Legacy`]         |
//! | `http://host/path` (proxy form)   | [`Route::Legacy`]         |
//!
//! Both target-carrying routes resolve to a [`TargetUrl`], whose scheme is
//! guaranteed to be `http` or `https`.

use std::fmt;

use url::Url;

use crate::codec::decode_target;
use crate::error::DecodeError;

/// Liveness endpoint path.
pub const HEALTH_PATH: &str = "/health";
/// Path prefix of the Base64URL-encoded form.
pub const FETCH_PREFIX: &str = "/fetch/";
/// Header carrying the gateway API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Query parameter accepted as an alternative to [`API_KEY_HEADER`] on the
/// encoded form.
pub const API_KEY_QUERY_PARAM: &str = "api_key";

/// A validated absolute `http`/`https` URL to fetch on the client's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    url: Url,
    host: String,
}

impl TargetUrl {
    /// Validate a raw target string.
    ///
    /// The scheme check is a case-sensitive prefix match on `http://` and
    /// `https://`, performed before any parsing.
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        if !(raw.starts_with("http://") || raw.starts_with("https://")) {
            return Err(DecodeError::InvalidScheme);
        }

        let url = Url::parse(raw).map_err(|e| DecodeError::InvalidUrl(e.to_string()))?;
        let host = url
            .host_str()
            .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DecodeError::InvalidUrl("missing host".into()))?;

        Ok(Self { url, host })
    }

    /// Decode a `/fetch/` token and validate the result.
    pub fn from_token(token: &str) -> Result<Self, DecodeError> {
        let decoded = decode_target(token)?;
        Self::parse(&decoded)
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Lower-cased host without a trailing dot. IPv6 literals keep brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Classification of an inbound request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `GET /health`.
    Health,
    /// `/fetch/<token>`; `query` is the gateway's own query string.
    Encoded { token: String, query: Option<String> },
    /// Target URL carried literally; `raw` includes the target's query.
    Legacy { raw: String },
}

impl Route {
    /// Classify a request target as it appeared on the request line:
    /// origin form (`/path?query`) or absolute form (`http://host/path`).
    pub fn from_request_target(target: &str) -> Self {
        let Some(origin) = target.strip_prefix('/') else {
            return Route::Legacy {
                raw: target.to_string(),
            };
        };

        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (target, None),
        };

        if path == HEALTH_PATH {
            return Route::Health;
        }
        if let Some(token) = path.strip_prefix(FETCH_PREFIX) {
            return Route::Encoded {
                token: token.to_string(),
                query,
            };
        }
        if path == FETCH_PREFIX.trim_end_matches('/') {
            return Route::Encoded {
                token: String::new(),
                query,
            };
        }

        Route::Legacy {
            raw: origin.to_string(),
        }
    }

    /// Resolve the route to a validated target. `None` for [`Route::Health`].
    pub fn target(&self) -> Option<Result<TargetUrl, DecodeError>> {
        match self {
            Route::Health => None,
            Route::Encoded { token, .. } => Some(TargetUrl::from_token(token)),
            Route::Legacy { raw } => Some(TargetUrl::parse(raw)),
        }
    }

    /// API key passed as a query parameter. Only the encoded form carries a
    /// gateway query string; the legacy form's query belongs to the target.
    pub fn query_api_key(&self) -> Option<String> {
        match self {
            Route::Encoded {
                query: Some(query), ..
            } => url::form_urlencoded::parse(query.as_bytes())
                .find(|(k, _)| k == API_KEY_QUERY_PARAM)
                .map(|(_, v)| v.into_owned()),
            _ => None,
        }
    }
}
