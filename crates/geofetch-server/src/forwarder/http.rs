//! reqwest-backed forwarder.
//!
//! One [`reqwest::Client`] is built at startup and shared by every request,
//! so connection pools are reused. Whether traffic leaves directly or
//! through a second-hop proxy is decided here, once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use geofetch_core::{GatewayError, GatewayResult, TargetUrl};
use reqwest::redirect;
use tracing::{debug, warn};

use super::{OutboundRequest, RelayedResponse, Upstream};
use crate::access::{DomainPolicy, DomainPolicyEnforcer};
use crate::config::{GatewayConfig, UpstreamProxy};

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// How the gateway reaches targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Egress {
    /// Connect straight to the target. Ambient `HTTP_PROXY` variables are
    /// ignored.
    Direct,
    /// Route every request through a second-hop proxy.
    Proxy(UpstreamProxy),
}

impl Egress {
    pub fn from_config(config: &GatewayConfig) -> Self {
        match &config.upstream_proxy {
            Some(proxy) => Egress::Proxy(proxy.clone()),
            None => Egress::Direct,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Egress::Direct => "direct",
            Egress::Proxy(_) => "proxy",
        }
    }
}

/// Forwards requests with a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    egress: Egress,
    timeout: Duration,
    max_response_size: u64,
}

impl HttpForwarder {
    /// Build the client for the configured egress, timeout, and redirect
    /// behaviour. Redirect hops are re-checked against the domain policy so
    /// an allowed host cannot bounce the gateway somewhere it may not go.
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let egress = Egress::from_config(config);
        let redirects = if config.follow_redirects {
            let domains = Arc::new(DomainPolicyEnforcer::new(&DomainPolicy {
                allowed_domains: config.allowed_domains.clone(),
                blocked_domains: config.blocked_domains.clone(),
            }));
            redirect_policy(domains)
        } else {
            redirect::Policy::none()
        };

        let builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(redirects);

        let builder = match &egress {
            Egress::Direct => builder.no_proxy(),
            Egress::Proxy(proxy) => {
                let mut upstream = reqwest::Proxy::all(&proxy.url).map_err(|e| {
                    GatewayError::Config(format!("invalid upstream proxy {}: {e}", proxy.url))
                })?;
                if let Some(user) = &proxy.username {
                    let pass = proxy.password.as_ref().map(|p| p.expose()).unwrap_or("");
                    upstream = upstream.basic_auth(user, pass);
                }
                builder.proxy(upstream)
            }
        };

        let client = builder
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            egress,
            timeout: config.timeout,
            max_response_size: config.max_response_size,
        })
    }

    pub fn egress(&self) -> &Egress {
        &self.egress
    }

    async fn round_trip(&self, request: OutboundRequest) -> GatewayResult<RelayedResponse> {
        let is_head = request.method == reqwest::Method::HEAD;
        let target = request.target.to_string();

        let mut builder = self
            .client
            .request(request.method, request.target.url().clone())
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| self.classify(&target, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let limit = self.max_response_size;

        // Reject early when the upstream announces an oversized body.
        if !is_head {
            if let Some(len) = response.content_length() {
                if len > limit {
                    warn!(%target, len, limit, "upstream response too large");
                    return Err(GatewayError::ResponseTooLarge { limit });
                }
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.classify(&target, e))?
        {
            if (body.len() + chunk.len()) as u64 > limit {
                warn!(%target, limit, "upstream response exceeded limit mid-stream");
                return Err(GatewayError::ResponseTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(%target, %status, bytes = body.len(), "upstream responded");
        Ok(RelayedResponse {
            status,
            headers,
            body: Bytes::from(body),
        })
    }

    fn classify(&self, target: &str, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            warn!(%target, timeout = ?self.timeout, "upstream timed out");
            return GatewayError::UpstreamTimeout(self.timeout);
        }
        let detail = if err.is_redirect() {
            "redirect limit reached".to_string()
        } else if err.is_connect() {
            format!("connection failed: {}", error_chain(&err))
        } else {
            error_chain(&err)
        };
        warn!(%target, egress = self.egress.label(), %detail, "upstream unreachable");
        GatewayError::UpstreamUnreachable(detail)
    }
}

impl Upstream for HttpForwarder {
    fn forward(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<RelayedResponse>> + Send + '_>> {
        Box::pin(self.round_trip(request))
    }

    fn egress_label(&self) -> &'static str {
        self.egress.label()
    }
}

fn redirect_policy(domains: Arc<DomainPolicyEnforcer>) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let allowed = TargetUrl::parse(attempt.url().as_str())
            .ok()
            .is_some_and(|next| domains.check_host(next.host()).is_ok());
        if allowed {
            attempt.follow()
        } else {
            debug!(location = %attempt.url(), "redirect leaves allowed domains, relaying 3xx");
            attempt.stop()
        }
    })
}

/// Flatten an error and its sources into one line. reqwest's top-level
/// message alone rarely says what actually failed.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, Secret};
    use axum::body::Body;
    use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
    use axum::response::{IntoResponse, Redirect, Response};
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config() -> GatewayConfig {
        GatewayConfig::from_sources(ConfigFile::default(), &HashMap::new(), None).unwrap()
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn target(addr: SocketAddr, path: &str) -> TargetUrl {
        TargetUrl::parse(&format!("http://{addr}{path}")).unwrap()
    }

    fn stub_upstream() -> Router {
        Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route(
                "/echo",
                axum::routing::any(|headers: HeaderMap, body: String| async move {
                    let ua = headers
                        .get("x-custom")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    format!("{ua}|{body}")
                }),
            )
            .route("/big", get(|| async { "x".repeat(4096) }))
            .route(
                "/stream",
                get(|| async {
                    let chunks = futures_util::stream::iter(
                        (0..8).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![b'y'; 512]))),
                    );
                    Response::new(Body::from_stream(chunks))
                }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .route("/bounce", get(|| async { Redirect::temporary("/ok") }))
            .route(
                "/away",
                get(|| async { Redirect::temporary("http://blocked.invalid/x") }),
            )
            .route(
                "/teapot",
                get(|| async { (StatusCode::IM_A_TEAPOT, "short and stout").into_response() }),
            )
    }

    #[tokio::test]
    async fn relays_status_and_body() {
        let addr = serve(stub_upstream()).await;
        let fwd = HttpForwarder::from_config(&config()).unwrap();
        assert_eq!(fwd.egress_label(), "direct");

        let resp = fwd.forward(OutboundRequest::get(target(addr, "/ok"))).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(&resp.body[..], b"ok");

        let resp = fwd
            .forward(OutboundRequest::get(target(addr, "/teapot")))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn forwards_method_headers_and_body() {
        let addr = serve(stub_upstream()).await;
        let fwd = HttpForwarder::from_config(&config()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-custom", HeaderValue::from_static("abc"));
        let resp = fwd
            .forward(OutboundRequest {
                method: Method::POST,
                target: target(addr, "/echo"),
                headers,
                body: Bytes::from_static(b"payload"),
            })
            .await
            .unwrap();
        assert_eq!(&resp.body[..], b"abc|payload");
    }

    #[tokio::test]
    async fn oversized_response_is_rejected() {
        let addr = serve(stub_upstream()).await;
        let mut cfg = config();
        cfg.max_response_size = 1024;
        let fwd = HttpForwarder::from_config(&cfg).unwrap();

        for path in ["/big", "/stream"] {
            let err = fwd
                .forward(OutboundRequest::get(target(addr, path)))
                .await
                .unwrap_err();
            assert!(
                matches!(err, GatewayError::ResponseTooLarge { limit: 1024 }),
                "{path}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn slow_upstream_times_out_within_bound() {
        let addr = serve(stub_upstream()).await;
        let mut cfg = config();
        cfg.timeout = Duration::from_millis(300);
        let fwd = HttpForwarder::from_config(&cfg).unwrap();

        let started = std::time::Instant::now();
        let err = fwd
            .forward(OutboundRequest::get(target(addr, "/slow")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 504);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let fwd = HttpForwarder::from_config(&config()).unwrap();
        let err = fwd
            .forward(OutboundRequest::get(
                TargetUrl::parse("http://127.0.0.1:1/").unwrap(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnreachable(_)), "{err:?}");
        assert_eq!(err.status(), 502);
    }

    #[tokio::test]
    async fn redirects_follow_within_policy_and_stop_outside() {
        let addr = serve(stub_upstream()).await;
        let mut cfg = config();
        cfg.allowed_domains = vec!["127.0.0.1".into()];
        let fwd = HttpForwarder::from_config(&cfg).unwrap();

        let resp = fwd
            .forward(OutboundRequest::get(target(addr, "/bounce")))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(&resp.body[..], b"ok");

        let resp = fwd
            .forward(OutboundRequest::get(target(addr, "/away")))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(resp.headers[header::LOCATION], "http://blocked.invalid/x");
    }

    #[tokio::test]
    async fn redirects_relayed_when_following_disabled() {
        let addr = serve(stub_upstream()).await;
        let mut cfg = config();
        cfg.follow_redirects = false;
        let fwd = HttpForwarder::from_config(&cfg).unwrap();
        let resp = fwd
            .forward(OutboundRequest::get(target(addr, "/bounce")))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::TEMPORARY_REDIRECT);
    }

    /// Minimal forward proxy: checks credentials, answers every request
    /// itself, and echoes the absolute-form request line it received.
    async fn stub_proxy() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let n = sock.read(&mut buf).await.unwrap_or(0);
                    let head = String::from_utf8_lossy(&buf[..n]).to_string();
                    let line = head.lines().next().unwrap_or("").to_string();
                    let authed = head
                        .to_ascii_lowercase()
                        .contains("proxy-authorization: basic dxnlcjpwyxnz");
                    let (status, body) = if authed {
                        ("200 OK", line)
                    } else {
                        ("407 Proxy Authentication Required", String::new())
                    };
                    let reply = format!(
                        "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(reply.as_bytes()).await;
                });
            }
        });
        addr
    }

    fn proxied(addr: SocketAddr, user: Option<&str>, pass: Option<&str>) -> HttpForwarder {
        let mut cfg = config();
        cfg.upstream_proxy = Some(UpstreamProxy {
            url: format!("http://{addr}"),
            username: user.map(str::to_string),
            password: pass.map(Secret::new),
        });
        HttpForwarder::from_config(&cfg).unwrap()
    }

    #[tokio::test]
    async fn proxy_egress_sends_basic_credentials() {
        let proxy = stub_proxy().await;
        let fwd = proxied(proxy, Some("user"), Some("pass"));
        assert_eq!(fwd.egress_label(), "proxy");

        let resp = fwd
            .forward(OutboundRequest::get(
                TargetUrl::parse("http://upstream.example/data?x=1").unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        let line = String::from_utf8(resp.body.to_vec()).unwrap();
        assert_eq!(line, "GET http://upstream.example/data?x=1 HTTP/1.1");
    }

    #[tokio::test]
    async fn proxy_without_credentials_is_refused_by_proxy() {
        let proxy = stub_proxy().await;
        let fwd = proxied(proxy, None, None);
        let resp = fwd
            .forward(OutboundRequest::get(
                TargetUrl::parse("http://upstream.example/").unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::PROXY_AUTHENTICATION_REQUIRED);
    }
}
