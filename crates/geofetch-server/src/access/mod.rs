//! Access control — decides whether a decoded request may reach the
//! forwarder.
//!
//! # Submodule Architecture
//!
//! - **[`policy`]** — [`DomainPolicyEnforcer`] allow/deny host matching.
//! - **[`api_key`]** — [`ApiKeyCheck`], exact-match key verification.
//! - **[`rate_limit`]** — [`RateLimiter`], sliding-window counters per
//!   client identity. The only mutable state shared between requests.
//!
//! # Check Order
//!
//! ```text
//! AccessControl::check
//!   → DomainPolicyEnforcer::check_host   (403 forbidden)
//!   → ApiKeyCheck::verify                (401 unauthorized)
//!   → RateLimiter::check_and_record      (429 rate-limited)
//! ```
//!
//! A rejected key is still charged to `ip:<addr>`, so once an address is
//! over the cap its key guesses get 429 instead of 401.
//!
//! A decision is computed fresh for every request; nothing is cached.

pub mod api_key;
pub mod policy;
pub mod rate_limit;

pub use api_key::ApiKeyCheck;
pub use policy::{DomainPolicy, DomainPolicyEnforcer};
pub use rate_limit::{RateDecision, RateLimiter};

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use geofetch_core::{GatewayError, TargetUrl};
use tracing::debug;

use crate::config::GatewayConfig;

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    DomainBlocked(String),
    RateLimited { retry_after: Duration },
}

/// Result of the access checks for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Proceed; `client` is the identity the request was counted against.
    Allow { client: String },
    Deny(DenyReason),
}

impl AccessDecision {
    #[cfg(test)]
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow { .. })
    }

    /// Convert a denial into the matching [`GatewayError`].
    pub fn into_result(self) -> Result<String, GatewayError> {
        match self {
            AccessDecision::Allow { client } => Ok(client),
            AccessDecision::Deny(DenyReason::Unauthenticated) => Err(GatewayError::Unauthorized),
            AccessDecision::Deny(DenyReason::DomainBlocked(reason)) => {
                Err(GatewayError::Forbidden(reason))
            }
            AccessDecision::Deny(DenyReason::RateLimited { retry_after }) => {
                // Round up so clients never retry before the window frees a slot.
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Err(GatewayError::RateLimited {
                    retry_after_secs: secs.max(1),
                })
            }
        }
    }
}

/// Inputs to [`AccessControl::check`].
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub target: &'a TargetUrl,
    pub api_key: Option<&'a str>,
    pub client_ip: IpAddr,
}

/// Owns the three access checks. Built once at startup.
#[derive(Debug)]
pub struct AccessControl {
    api_key: ApiKeyCheck,
    domains: DomainPolicyEnforcer,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl AccessControl {
    pub fn new(
        api_key: ApiKeyCheck,
        domains: DomainPolicyEnforcer,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        Self {
            api_key,
            domains,
            rate_limiter,
        }
    }

    /// Build from configuration. `RATE_LIMIT=0` leaves the limiter out.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let api_key = ApiKeyCheck::new(config.api_key.as_ref().map(|k| k.expose()));
        let domains = DomainPolicyEnforcer::new(&DomainPolicy {
            allowed_domains: config.allowed_domains.clone(),
            blocked_domains: config.blocked_domains.clone(),
        });
        let rate_limiter = (config.rate_limit > 0)
            .then(|| Arc::new(RateLimiter::new(config.rate_limit, config.rate_limit_window)));
        Self::new(api_key, domains, rate_limiter)
    }

    pub fn domains(&self) -> &DomainPolicyEnforcer {
        &self.domains
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    pub fn auth_enabled(&self) -> bool {
        self.api_key.is_enabled()
    }

    /// Run the checks in order and stop at the first refusal.
    ///
    /// The client identity is the verified API key when auth is enabled,
    /// otherwise the client IP. Unverified keys never become identities;
    /// failed attempts are counted against the IP instead.
    pub fn check(&self, request: AccessRequest<'_>) -> AccessDecision {
        if let Err(reason) = self.domains.check_host(request.target.host()) {
            debug!(host = %request.target.host(), %reason, "domain denied");
            return AccessDecision::Deny(DenyReason::DomainBlocked(reason));
        }

        let ip_identity = format!("ip:{}", request.client_ip);

        if !self.api_key.verify(request.api_key) {
            debug!(client_ip = %request.client_ip, "api key rejected");
            if let Some(deny) = self.charge(&ip_identity) {
                return deny;
            }
            return AccessDecision::Deny(DenyReason::Unauthenticated);
        }

        let client = match request.api_key {
            Some(key) if self.api_key.is_enabled() => {
                format!("key:{}", api_key::key_fingerprint(key))
            }
            _ => ip_identity,
        };

        if let Some(deny) = self.charge(&client) {
            return deny;
        }

        AccessDecision::Allow { client }
    }

    /// Record one request for `client`; `Some` when it is over the cap.
    fn charge(&self, client: &str) -> Option<AccessDecision> {
        let limiter = self.rate_limiter.as_ref()?;
        match limiter.check_and_record(client) {
            RateDecision::Limited { retry_after } => {
                debug!(%client, ?retry_after, "rate limited");
                Some(AccessDecision::Deny(DenyReason::RateLimited { retry_after }))
            }
            RateDecision::Allowed { .. } => None,
        }
    }
}
