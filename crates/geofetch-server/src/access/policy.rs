//! Domain policy — controls which target hosts the gateway may fetch.
//!
//! The policy layer is split into two types:
//!
//! - [`DomainPolicy`] — a plain configuration struct holding the allow and
//!   deny lists as written.
//! - [`DomainPolicyEnforcer`] — the runtime counterpart with the lists
//!   pre-compiled into lookup sets.

use std::collections::HashSet;

/// Static domain access-control configuration.
///
/// # Host Matching
///
/// Both lists use the same patterns; matching is case-insensitive and
/// ignores a trailing dot.
///
/// | Pattern          | Matches                                             |
/// |------------------|-----------------------------------------------------|
/// | `"*"`            | Any host.                                           |
/// | `"law.go.kr"`    | Exactly `law.go.kr`. Subdomains do **not** match.   |
/// | `"*.law.go.kr"`  | Any subdomain (`www.law.go.kr`), not `law.go.kr`.   |
///
/// An empty allow list means allow-all. The deny list always wins.
#[derive(Debug, Clone)]
pub struct DomainPolicy {
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
}

/// Default policy: allow every host, block none.
impl Default for DomainPolicy {
    fn default() -> Self {
        Self {
            allowed_domains: vec!["*".to_string()],
            blocked_domains: Vec::new(),
        }
    }
}

/// Pre-compiled host patterns.
#[derive(Debug, Default)]
struct HostSet {
    any: bool,
    exact: HashSet<String>,
    /// Wildcard suffixes, stored with their leading dot (`.law.go.kr`).
    suffixes: Vec<String>,
}

impl HostSet {
    fn compile(patterns: &[String]) -> Self {
        let mut set = HostSet::default();
        for pattern in patterns {
            let pattern = normalize(pattern);
            if pattern.is_empty() {
                continue;
            }
            if pattern == "*" {
                set.any = true;
            } else if let Some(base) = pattern.strip_prefix("*.") {
                set.suffixes.push(format!(".{base}"));
            } else {
                set.exact.insert(pattern);
            }
        }
        set
    }

    fn is_empty(&self) -> bool {
        !self.any && self.exact.is_empty() && self.suffixes.is_empty()
    }

    fn matches(&self, host: &str) -> bool {
        self.any
            || self.exact.contains(host)
            || self
                .suffixes
                .iter()
                .any(|suffix| host.len() > suffix.len() && host.ends_with(suffix.as_str()))
    }
}

fn normalize(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Runtime policy enforcer.
#[derive(Debug)]
pub struct DomainPolicyEnforcer {
    allowed: HostSet,
    blocked: HostSet,
    /// Fast-path flag: allow list is empty or contains `"*"`.
    allow_all: bool,
}

impl DomainPolicyEnforcer {
    pub fn new(policy: &DomainPolicy) -> Self {
        let allowed = HostSet::compile(&policy.allowed_domains);
        let blocked = HostSet::compile(&policy.blocked_domains);
        let allow_all = allowed.any || allowed.is_empty();
        Self {
            allowed,
            blocked,
            allow_all,
        }
    }

    /// Check whether `host` may be fetched.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` naming the reason when the host is on the deny
    /// list or missing from a non-empty allow list.
    pub fn check_host(&self, host: &str) -> Result<(), String> {
        let host = normalize(host);

        if self.blocked.matches(&host) {
            return Err(format!("{host} is blocked"));
        }
        if self.allow_all || self.allowed.matches(&host) {
            return Ok(());
        }
        Err(format!("{host} is not in the allow list"))
    }

    /// Whether every host passes (no allow list and no deny list).
    pub fn is_open(&self) -> bool {
        self.allow_all && self.blocked.is_empty()
    }
}
