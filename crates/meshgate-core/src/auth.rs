use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Permission context derived from a token check. Produced per-request,
/// never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AuthContext {
    /// Identifies the caller's environment/class, e.g. "server" or "guest".
    #[serde(default)]
    pub profile: String,
    /// Per-service allow list.
    #[serde(default)]
    pub services: HashMap<String, bool>,
}

impl AuthContext {
    pub fn allows(&self, service: &str) -> bool {
        self.services.get(service).copied().unwrap_or(false)
    }
}

/// Trusted-origin predicate for the privileged administrative surface.
/// Trusts the presented address as-is; a fronting reverse proxy is assumed.
#[derive(Debug, Clone)]
pub struct TrustedOrigins {
    addrs: HashSet<IpAddr>,
}

impl TrustedOrigins {
    /// The default set: loopback only.
    pub fn loopback() -> Self {
        let addrs = ["127.0.0.1", "::1"]
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect();
        Self { addrs }
    }

    /// Parse a comma-separated address list. Unparseable entries are
    /// dropped; an empty or all-invalid list falls back to loopback.
    pub fn from_list(list: &str) -> Self {
        let addrs: HashSet<IpAddr> = list
            .split(',')
            .filter_map(|a| a.trim().parse().ok())
            .collect();
        if addrs.is_empty() {
            Self::loopback()
        } else {
            Self { addrs }
        }
    }

    pub fn is_trusted(&self, addr: IpAddr) -> bool {
        self.addrs.contains(&addr)
    }
}

impl Default for TrustedOrigins {
    fn default() -> Self {
        Self::loopback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_trusts_both_families() {
        let t = TrustedOrigins::loopback();
        assert!(t.is_trusted("127.0.0.1".parse().unwrap()));
        assert!(t.is_trusted("::1".parse().unwrap()));
        assert!(!t.is_trusted("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn configured_list_replaces_loopback() {
        let t = TrustedOrigins::from_list("10.0.0.5, 192.168.1.1");
        assert!(t.is_trusted("10.0.0.5".parse().unwrap()));
        assert!(!t.is_trusted("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn garbage_list_falls_back_to_loopback() {
        let t = TrustedOrigins::from_list("not-an-ip");
        assert!(t.is_trusted("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn missing_service_is_denied() {
        let ctx = AuthContext::default();
        assert!(!ctx.allows("echo"));

        let ctx: AuthContext =
            serde_json::from_str(r#"{"profile":"guest","services":{"echo":true,"db":false}}"#)
                .unwrap();
        assert!(ctx.allows("echo"));
        assert!(!ctx.allows("db"));
        assert!(!ctx.allows("other"));
    }
}
