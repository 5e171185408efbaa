//! HTTP surface: `/health`, `/fetch/<token>`, and the legacy `/<url>` form.
//!
//! Every target-carrying request walks the same pipeline:
//!
//! ```text
//! classify route → decode target (400) → access control (403/401/429)
//!   → read body (413) → filter headers → Upstream::forward (502/504)
//!   → filter response headers → relay
//! ```
//!
//! The forwarder is only reached once access control has allowed the
//! request. `/health` never reaches it: the egress probe runs on a
//! background task and `/health` reports the last stored outcome.

use std::any::Any;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use geofetch_core::{
    DecodeError, GatewayError, GatewayResult, Route, TargetUrl, API_KEY_HEADER,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::access::{AccessControl, AccessRequest};
use crate::config::GatewayConfig;
use crate::forwarder::{HeaderFilter, OutboundRequest, Upstream};

/// Longest egress probe body reported by `/health`.
const PROBE_BODY_LIMIT: usize = 128;

/// Upper bound on one egress probe, independent of `TIMEOUT`.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Last outcome of the egress probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ip: Option<String>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            ip: None,
            error: Some(error.into()),
        }
    }
}

/// Shared, read-only request-handling state.
pub struct AppState {
    pub access: AccessControl,
    pub upstream: Arc<dyn Upstream>,
    pub headers: HeaderFilter,
    pub enable_legacy_path: bool,
    pub enable_fetch_path: bool,
    pub trust_forwarded_for: bool,
    pub max_request_size: usize,
    pub egress_probe: Option<TargetUrl>,
    pub egress_status: RwLock<ProbeOutcome>,
    pub started: Instant,
}

impl AppState {
    pub fn new(config: &GatewayConfig, upstream: Arc<dyn Upstream>) -> GatewayResult<Self> {
        let egress_probe = config
            .egress_probe_url
            .as_deref()
            .map(TargetUrl::parse)
            .transpose()
            .map_err(|e| GatewayError::Config(format!("EGRESS_PROBE_URL: {e}")))?;

        let access = AccessControl::from_config(config);
        if let Some(probe) = &egress_probe {
            access.domains().check_host(probe.host()).map_err(|reason| {
                GatewayError::Config(format!("EGRESS_PROBE_URL: {reason}"))
            })?;
        }
        let egress_status = if egress_probe.is_some() {
            ProbeOutcome::failed("pending")
        } else {
            ProbeOutcome::default()
        };

        Ok(Self {
            access,
            upstream,
            headers: HeaderFilter::new(&config.strip_headers, config.enable_cors),
            enable_legacy_path: config.enable_legacy_path,
            enable_fetch_path: config.enable_fetch_path,
            trust_forwarded_for: config.trust_forwarded_for,
            max_request_size: usize::try_from(config.max_request_size).unwrap_or(usize::MAX),
            egress_probe,
            egress_status: RwLock::new(egress_status),
            started: Instant::now(),
        })
    }

    /// Fetch the probe URL once and store the result for `/health`.
    /// A no-op when no probe URL is configured.
    pub async fn probe_egress(&self) {
        let Some(probe) = &self.egress_probe else {
            return;
        };
        let request = OutboundRequest::get(probe.clone());
        let outcome = match tokio::time::timeout(PROBE_TIMEOUT, self.upstream.forward(request)).await {
            Ok(Ok(resp)) if resp.status.is_success() => {
                let text = String::from_utf8_lossy(&resp.body);
                ProbeOutcome {
                    ip: Some(text.trim().chars().take(PROBE_BODY_LIMIT).collect()),
                    error: None,
                }
            }
            Ok(Ok(resp)) => ProbeOutcome::failed(format!("probe returned {}", resp.status)),
            Ok(Err(e)) => ProbeOutcome::failed(e.code()),
            Err(_) => ProbeOutcome::failed("upstream-timeout"),
        };
        debug!(?outcome, "egress probe");
        *self.egress_status.write().await = outcome;
    }
}

/// The gateway's HTTP front end.
pub struct GatewayServer {
    state: Arc<AppState>,
    enable_cors: bool,
}

impl GatewayServer {
    pub fn new(config: &GatewayConfig, upstream: Arc<dyn Upstream>) -> GatewayResult<Self> {
        Ok(Self {
            state: Arc::new(AppState::new(config, upstream)?),
            enable_cors: config.enable_cors,
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Run the egress probe now and then every `every`, on a background
    /// task. Does nothing when no probe URL is configured.
    pub fn start_egress_probe(&self, every: Duration) {
        if self.state.egress_probe.is_none() {
            return;
        }
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                state.probe_egress().await;
            }
        });
    }

    /// Build the router. Layers from inside out: panic catcher, CORS
    /// (optional), request tracing.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health))
            .fallback(dispatch)
            .with_state(self.state.clone())
            .layer(CatchPanicLayer::custom(handle_panic));

        if self.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(cors::Any)
                    .allow_methods(cors::Any)
                    .allow_headers(cors::Any)
                    .expose_headers(cors::Any),
            );
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
    }
}

/// Error wrapper that renders as the JSON error body.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl From<DecodeError> for ApiError {
    fn from(err: DecodeError) -> Self {
        ApiError(GatewayError::Decode(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(&self.0)
    }
}

fn error_response(err: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(err.to_body())).into_response();
    if let GatewayError::RateLimited { retry_after_secs } = err {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
    }
    response
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(%detail, "request handler panicked");
    error_response(&GatewayError::Internal(detail.to_string()))
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    egress: EgressReport,
}

#[derive(Debug, Serialize)]
struct EgressReport {
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    probe_error: Option<String>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthBody> {
    let outcome = state.egress_status.read().await.clone();
    Json(HealthBody {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started.elapsed().as_secs(),
        egress: EgressReport {
            mode: state.upstream.egress_label(),
            ip: outcome.ip,
            probe_error: outcome.error,
        },
    })
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();

    // Absolute-form targets (`GET http://host/ HTTP/1.1`) carry a scheme.
    let request_target = if parts.uri.scheme().is_some() {
        parts.uri.to_string()
    } else {
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string())
    };

    let route = Route::from_request_target(&request_target);
    match &route {
        Route::Health => return Ok(health(State(state)).await.into_response()),
        Route::Encoded { .. } if !state.enable_fetch_path => {
            return Err(GatewayError::NotFound(parts.uri.path().to_string()).into());
        }
        Route::Legacy { .. } if !state.enable_legacy_path => {
            return Err(GatewayError::NotFound(parts.uri.path().to_string()).into());
        }
        _ => {}
    }

    let target = match route.target() {
        Some(result) => result?,
        None => return Err(GatewayError::NotFound(parts.uri.path().to_string()).into()),
    };

    let query_key = route.query_api_key();
    let api_key = parts
        .headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query_key.as_deref());
    let client_ip = resolve_client_ip(
        &parts.headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.trust_forwarded_for,
    );

    let client = state
        .access
        .check(AccessRequest {
            target: &target,
            api_key,
            client_ip,
        })
        .into_result()
        .inspect_err(|e| info!(%client_ip, host = %target.host(), code = e.code(), "request denied"))?;

    let body = to_bytes(body, state.max_request_size).await.map_err(|_| {
        GatewayError::RequestTooLarge {
            limit: state.max_request_size as u64,
        }
    })?;

    let method = parts.method.clone();
    let host = target.host().to_string();
    let outbound = OutboundRequest {
        method: parts.method,
        target,
        headers: state.headers.request(&parts.headers),
        body,
    };

    let relayed = match state.upstream.forward(outbound).await {
        Ok(relayed) => relayed,
        Err(e) => {
            warn!(%client, %method, %host, code = e.code(), "forward failed");
            return Err(e.into());
        }
    };

    info!(
        %client,
        %method,
        %host,
        status = relayed.status.as_u16(),
        bytes = relayed.body.len(),
        "relayed"
    );

    let mut response = Response::new(Body::from(relayed.body));
    *response.status_mut() = relayed.status;
    *response.headers_mut() = state.headers.response(&relayed.headers);
    Ok(response)
}

/// Client address used for rate limiting. Forwarding headers are honored
/// only when the gateway sits behind a trusted reverse proxy or tunnel.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> IpAddr {
    if trust_forwarded {
        let forwarded = headers
            .get("cf-connecting-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
            .or_else(|| {
                headers
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(',').next())
                    .and_then(|v| v.trim().parse::<IpAddr>().ok())
            });
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    peer.map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
