//! Sandbox policy: network allow-lists and resource limits.
//!
//! A [`SandboxPolicy`] is supplied per execution and never mutates session
//! state. Commands describe the capability they are about to exercise as an
//! [`Intent`] and call [`authorize`] before acting; the default policy
//! denies every network intent. Resource limits are enforced by the runner
//! around the whole line, not per intent.

use serde_json::Value;

use crate::error::{Error, Result, ShellReason};
use crate::limits::{ResourceLimits, positive};

/// A capability a command is about to exercise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    /// Outbound network access.
    Network {
        /// Target host name.
        domain: String,
        /// Target port, if known.
        port: Option<u16>,
    },
}

impl Intent {
    /// Network intent for `domain`, optionally on `port`.
    pub fn network(domain: impl Into<String>, port: Option<u16>) -> Self {
        Intent::Network {
            domain: domain.into(),
            port,
        }
    }
}

/// The result of a policy check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The intent is allowed.
    Allow,
    /// The intent is denied with a reason.
    Deny(String),
}

impl PolicyDecision {
    /// Returns true if the intent is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }

    /// Returns the denial reason if denied, None if allowed.
    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            PolicyDecision::Allow => None,
            PolicyDecision::Deny(reason) => Some(reason),
        }
    }
}

/// An allowed domain, matched case-insensitively as a glob.
#[derive(Clone, Debug)]
struct DomainRule {
    raw: String,
    pattern: glob::Pattern,
}

impl DomainRule {
    fn new(domain: &str) -> Option<Self> {
        let raw = domain.trim().to_ascii_lowercase();
        if raw.is_empty() {
            return None;
        }
        let pattern = glob::Pattern::new(&raw).ok()?;
        Some(Self { raw, pattern })
    }

    fn matches(&self, domain: &str) -> bool {
        self.pattern.matches(&domain.to_ascii_lowercase())
    }
}

/// Network allow-list.
///
/// A domain must match one of `allow_domains` (exact names or globs such as
/// `*.example.com`). If `allow_ports` is non-empty, an intent naming a port
/// must also use one of them.
#[derive(Clone, Debug, Default)]
pub struct NetworkPolicy {
    domains: Vec<DomainRule>,
    ports: Vec<u16>,
}

impl NetworkPolicy {
    /// Deny all network access.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Allow a domain or domain glob. Invalid patterns are ignored.
    pub fn allow_domain(mut self, domain: impl AsRef<str>) -> Self {
        if let Some(rule) = DomainRule::new(domain.as_ref()) {
            self.domains.push(rule);
        }
        self
    }

    /// Restrict allowed domains to a port.
    pub fn allow_port(mut self, port: u16) -> Self {
        if !self.ports.contains(&port) {
            self.ports.push(port);
        }
        self
    }

    /// The allowed domain patterns.
    pub fn allowed_domains(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(|d| d.raw.as_str())
    }

    /// The allowed ports.
    pub fn allowed_ports(&self) -> &[u16] {
        &self.ports
    }

    /// Read the `network` object of an execution context.
    ///
    /// Non-string domains and out-of-range ports are skipped.
    pub fn from_value(value: &Value) -> Self {
        let mut policy = Self::default();
        if let Some(domains) = value.get("allow_domains").and_then(Value::as_array) {
            for domain in domains.iter().filter_map(Value::as_str) {
                policy = policy.allow_domain(domain);
            }
        }
        if let Some(ports) = value.get("allow_ports").and_then(Value::as_array) {
            for port in ports.iter().filter_map(positive) {
                if let Ok(port) = u16::try_from(port) {
                    policy = policy.allow_port(port);
                }
            }
        }
        policy
    }

    /// Check access to `domain` on `port`.
    pub fn check(&self, domain: &str, port: Option<u16>) -> PolicyDecision {
        if !self.domains.iter().any(|rule| rule.matches(domain)) {
            return PolicyDecision::Deny(format!("domain {domain} is not in the allow-list"));
        }
        match port {
            Some(port) if !self.ports.is_empty() && !self.ports.contains(&port) => {
                PolicyDecision::Deny(format!("port {port} is not in the allow-list"))
            }
            _ => PolicyDecision::Allow,
        }
    }
}

/// Per-execution sandbox policy.
#[derive(Clone, Debug, Default)]
pub struct SandboxPolicy {
    /// Network allow-list.
    pub network: NetworkPolicy,
    /// Runtime and output limits.
    pub limits: ResourceLimits,
}

impl SandboxPolicy {
    /// Deny network access, no limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the network policy.
    pub fn with_network(mut self, network: NetworkPolicy) -> Self {
        self.network = network;
        self
    }

    /// Replace the resource limits.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Build a policy from a caller-supplied execution context:
    ///
    /// ```json
    /// { "network": { "allow_domains": ["api.example.com"], "allow_ports": [443] },
    ///   "limits": { "max_runtime_ms": 5000, "max_output_bytes": "65536" } }
    /// ```
    ///
    /// Unrecognized or malformed keys are ignored.
    pub fn from_context(context: &Value) -> Self {
        Self {
            network: context
                .get("network")
                .map(NetworkPolicy::from_value)
                .unwrap_or_default(),
            limits: context
                .get("limits")
                .map(ResourceLimits::from_value)
                .unwrap_or_default(),
        }
    }

    /// Evaluate an intent without producing an error.
    pub fn check(&self, intent: &Intent) -> PolicyDecision {
        match intent {
            Intent::Network { domain, port } => self.network.check(domain, *port),
        }
    }
}

/// Authorize `intent` under `policy`.
///
/// Denials yield `shell: network_blocked`.
pub fn authorize(intent: &Intent, policy: &SandboxPolicy) -> Result<()> {
    match policy.check(intent) {
        PolicyDecision::Allow => Ok(()),
        PolicyDecision::Deny(reason) => {
            let Intent::Network { domain, port } = intent;
            tracing::debug!(domain = %domain, port = ?port, reason = %reason, "network intent denied");
            let mut err = Error::shell(ShellReason::NetworkBlocked, reason)
                .with_context("domain", domain);
            if let Some(port) = port {
                err = err.with_context("port", port);
            }
            Err(err)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_default_denies_network() {
        let err = authorize(&Intent::network("example.com", Some(443)), &SandboxPolicy::new())
            .unwrap_err();
        assert!(err.is(ShellReason::NetworkBlocked));
        assert_eq!(err.context().get("domain").map(String::as_str), Some("example.com"));
    }

    #[test]
    fn test_allow_domain() {
        let policy =
            SandboxPolicy::new().with_network(NetworkPolicy::deny_all().allow_domain("example.com"));
        authorize(&Intent::network("example.com", None), &policy).unwrap();
        authorize(&Intent::network("EXAMPLE.com", Some(80)), &policy).unwrap();
        assert!(authorize(&Intent::network("evil.com", None), &policy).is_err());
    }

    #[test]
    fn test_domain_glob() {
        let network = NetworkPolicy::deny_all().allow_domain("*.example.com");
        assert!(network.check("api.example.com", None).is_allowed());
        assert!(!network.check("example.com", None).is_allowed());
        assert!(!network.check("example.org", None).is_allowed());
    }

    #[test]
    fn test_port_allow_list() {
        let network = NetworkPolicy::deny_all()
            .allow_domain("example.com")
            .allow_port(443);
        assert!(network.check("example.com", Some(443)).is_allowed());
        assert!(network.check("example.com", None).is_allowed());

        let decision = network.check("example.com", Some(80));
        assert!(decision.denial_reason().unwrap().contains("port 80"));
    }

    #[test]
    fn test_from_context() {
        let policy = SandboxPolicy::from_context(&json!({
            "network": {
                "allow_domains": ["api.example.com", 42, ""],
                "allow_ports": [443, "8080", -1, 70000, "x"],
            },
            "limits": { "max_runtime_ms": "100", "max_output_bytes": 0 },
            "unknown": true,
        }));
        assert_eq!(
            policy.network.allowed_domains().collect::<Vec<_>>(),
            vec!["api.example.com"]
        );
        assert_eq!(policy.network.allowed_ports(), &[443, 8080]);
        assert_eq!(policy.limits.max_runtime, Some(Duration::from_millis(100)));
        assert_eq!(policy.limits.max_output_bytes, None);
    }

    #[test]
    fn test_from_context_malformed() {
        for context in [json!(null), json!("x"), json!({"network": "all", "limits": []})] {
            let policy = SandboxPolicy::from_context(&context);
            assert_eq!(policy.network.allowed_domains().count(), 0);
            assert_eq!(policy.limits, ResourceLimits::unlimited());
        }
    }
}
