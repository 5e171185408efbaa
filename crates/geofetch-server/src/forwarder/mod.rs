//! Upstream forwarding — performs the HTTP round-trip to the target and
//! hands the response back for relay.
//!
//! - **[`headers`]** — hop-by-hop and sensitive header stripping, applied by
//!   the server in both directions.
//! - **[`http`]** — [`HttpForwarder`], the reqwest-backed [`Upstream`], with
//!   its direct or proxied [`Egress`](http::Egress) fixed at construction.

pub mod headers;
pub mod http;

pub use self::headers::HeaderFilter;
pub use self::http::HttpForwarder;

use std::future::Future;
use std::pin::Pin;

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use geofetch_core::{GatewayResult, TargetUrl};

/// A request that has passed access control and is ready to leave the
/// gateway. Headers are already filtered.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub target: TargetUrl,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundRequest {
    /// A bodiless `GET` with no headers.
    pub fn get(target: TargetUrl) -> Self {
        Self {
            method: Method::GET,
            target,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Upstream reply, fully read and within the size limit.
#[derive(Debug, Clone)]
pub struct RelayedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Something that can carry an [`OutboundRequest`] to its target.
pub trait Upstream: Send + Sync {
    /// Perform a single attempt. Never retries.
    fn forward(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<RelayedResponse>> + Send + '_>>;

    /// Short label for logs and `/health` (`"direct"` or `"proxy"`).
    fn egress_label(&self) -> &'static str;
}
