//! Header filtering for both relay directions.
//!
//! Hop-by-hop headers describe a single transport connection and must not
//! cross the gateway (RFC 9110 §7.6.1). Everything else passes through with
//! its original values and multiplicity.

use std::collections::HashSet;

use axum::http::header::{self, HeaderMap, HeaderName};
use geofetch_core::API_KEY_HEADER;

/// Headers that are never forwarded in either direction.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Names listed in the `Connection` header, lower-cased.
fn connection_tokens(headers: &HeaderMap) -> HashSet<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Copy `headers`, dropping hop-by-hop headers, anything named in
/// `Connection`, and every name in `extra`.
pub fn strip_hop_by_hop(headers: &HeaderMap, extra: &HashSet<HeaderName>) -> HeaderMap {
    let listed = connection_tokens(headers);
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || listed.contains(name.as_str()) || extra.contains(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Per-direction filter built once from configuration.
#[derive(Debug, Clone)]
pub struct HeaderFilter {
    /// Configured sensitive headers, stripped both ways.
    sensitive: HashSet<HeaderName>,
    outbound: HashSet<HeaderName>,
    /// Upstream CORS headers are dropped when the gateway answers CORS itself.
    replace_cors: bool,
}

impl HeaderFilter {
    /// Names that fail to parse as header names are skipped with a warning.
    pub fn new(sensitive: &[String], replace_cors: bool) -> Self {
        let sensitive: HashSet<HeaderName> = sensitive
            .iter()
            .filter_map(|name| match HeaderName::try_from(name.trim()) {
                Ok(name) => Some(name),
                Err(_) => {
                    tracing::warn!(header = %name, "ignoring invalid strip header name");
                    None
                }
            })
            .collect();

        let mut outbound = sensitive.clone();
        outbound.insert(header::HOST);
        outbound.insert(header::CONTENT_LENGTH);
        outbound.insert(HeaderName::from_static(API_KEY_HEADER));

        Self {
            sensitive,
            outbound,
            replace_cors,
        }
    }

    /// Filter client headers before they are sent upstream. `Host` and
    /// `Content-Length` are recomputed by the HTTP client.
    pub fn request(&self, headers: &HeaderMap) -> HeaderMap {
        strip_hop_by_hop(headers, &self.outbound)
    }

    /// Filter upstream headers before they are relayed to the client.
    pub fn response(&self, headers: &HeaderMap) -> HeaderMap {
        let mut out = strip_hop_by_hop(headers, &self.sensitive);
        if self.replace_cors {
            let cors: Vec<HeaderName> = out
                .keys()
                .filter(|name| name.as_str().starts_with("access-control-"))
                .cloned()
                .collect();
            for name in cors {
                out.remove(name);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.append(
                HeaderName::try_from(*k).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn hop_by_hop_removed_from_response() {
        let filter = HeaderFilter::new(&[], false);
        let out = filter.response(&map(&[
            ("connection", "keep-alive"),
            ("transfer-encoding", "chunked"),
            ("keep-alive", "timeout=5"),
            ("content-type", "text/plain"),
            ("content-length", "2"),
        ]));
        assert!(out.get("connection").is_none());
        assert!(out.get("transfer-encoding").is_none());
        assert!(out.get("keep-alive").is_none());
        assert_eq!(out["content-type"], "text/plain");
        assert_eq!(out["content-length"], "2");
    }

    #[test]
    fn connection_listed_headers_removed() {
        let out = strip_hop_by_hop(
            &map(&[("connection", "close, X-Trace"), ("x-trace", "1"), ("x-keep", "2")]),
            &HashSet::new(),
        );
        assert!(out.get("x-trace").is_none());
        assert_eq!(out["x-keep"], "2");
    }

    #[test]
    fn request_drops_gateway_headers_and_sensitive() {
        let filter = HeaderFilter::new(&["Cookie".to_string()], false);
        let out = filter.request(&map(&[
            ("host", "gateway.local"),
            ("x-api-key", "secret"),
            ("cookie", "a=b"),
            ("proxy-authorization", "Basic Zm9v"),
            ("content-length", "10"),
            ("accept", "application/json"),
        ]));
        assert_eq!(out.len(), 1);
        assert_eq!(out["accept"], "application/json");
    }

    #[test]
    fn sensitive_headers_also_stripped_from_response() {
        let filter = HeaderFilter::new(&["set-cookie".to_string()], false);
        let out = filter.response(&map(&[("set-cookie", "sid=1"), ("etag", "\"x\"")]));
        assert!(out.get("set-cookie").is_none());
        assert!(out.get("etag").is_some());
    }

    #[test]
    fn repeated_headers_keep_multiplicity() {
        let filter = HeaderFilter::new(&[], false);
        let out = filter.response(&map(&[("set-cookie", "a=1"), ("set-cookie", "b=2")]));
        assert_eq!(out.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn upstream_cors_replaced_only_when_enabled() {
        let upstream = map(&[
            ("access-control-allow-origin", "https://only.example"),
            ("vary", "origin"),
        ]);
        assert!(HeaderFilter::new(&[], true)
            .response(&upstream)
            .get("access-control-allow-origin")
            .is_none());
        assert!(HeaderFilter::new(&[], false)
            .response(&upstream)
            .get("access-control-allow-origin")
            .is_some());
    }

    #[test]
    fn invalid_strip_names_are_ignored() {
        let filter = HeaderFilter::new(&["bad header".to_string(), " Cookie ".to_string()], false);
        let out = filter.request(&map(&[("cookie", "x")]));
        assert!(out.is_empty());
    }
}
